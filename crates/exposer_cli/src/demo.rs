//! Groups served by the `exposer` binary.

use exposer_base::ExposerResult;
use exposer_engine::{ApiFunction, GroupCatalog, GroupContext, GroupExports, Group};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

/// All groups the binary knows; `exposer.toml` picks which of them run.
pub fn catalog() -> GroupCatalog {
    GroupCatalog::new()
        .with(Group::from_sync("audit", audit))
        .with(Group::from_sync("calc", calc))
        .with(Group::from_sync("files", files))
}

/// Side-effect only group.
fn audit(context: GroupContext) -> ExposerResult<GroupExports> {
    context.logger.info("audit trail enabled");
    Ok(GroupExports::NoApis)
}

fn round(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

fn number_pair() -> Vec<Value> {
    vec![json!({"type": "number"}), json!({"type": "number"})]
}

fn calc(context: GroupContext) -> ExposerResult<GroupExports> {
    let precision = context.option::<u32>("precision")?.unwrap_or(6);
    context
        .logger
        .debug(&format!("rounding results to {} digits", precision));
    Ok(GroupExports::apis([
        (
            "add",
            ApiFunction::new("(a, b)", move |args| {
                Ok(json!(round(args.get::<f64>(0)? + args.get::<f64>(1)?, precision)))
            })
            .validate(number_pair())
            .description("Sum of two numbers"),
        ),
        (
            "sub",
            ApiFunction::new("(a, b)", move |args| {
                Ok(json!(round(args.get::<f64>(0)? - args.get::<f64>(1)?, precision)))
            })
            .validate(number_pair()),
        ),
        (
            "div",
            ApiFunction::new("(a, b)", move |args| -> ExposerResult<Value> {
                let divisor = args.get::<f64>(1)?;
                if divisor == 0.0 {
                    exposer_base::bail!("division by zero");
                }
                Ok(json!(round(args.get::<f64>(0)? / divisor, precision)))
            })
            .validate(number_pair())
            .response_schema(json!({"type": "number"}))
            .validate_response(true)
            .notes("Fails with a handler error when b is zero"),
        ),
        (
            "pi",
            ApiFunction::new("()", move |_| Ok(json!(round(std::f64::consts::PI, precision)))),
        ),
    ]))
}

fn files(_context: GroupContext) -> ExposerResult<GroupExports> {
    Ok(GroupExports::apis([
        (
            "checksum",
            ApiFunction::new("(data)", |mut args| {
                let data = args.take_buffer()?.unwrap_or_default();
                Ok(json!({
                    "sha256": hex::encode(Sha256::digest(&data)),
                    "size": data.len(),
                }))
            })
            .buffer_input()
            .description("SHA-256 of the request body"),
        ),
        (
            "echo",
            ApiFunction::new("(data)", |mut args| {
                let reader = args
                    .take_stream()
                    .ok_or_else(|| exposer_base::err!("no request body"))?;
                Ok(exposer_engine::ApiOutput::Stream(reader))
            })
            .stream_input(),
        ),
    ]))
}
