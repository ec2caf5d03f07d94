//! CLI command implementations

use std::time::Instant;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::catalog;
use crate::client::DaemonClient;

/// Parse a command-line argument as JSON, falling back to a plain string.
///
/// `128` is an integer, `0.5` a float, `true` a bool, and `Drums` stays a
/// string. Quote it (`'"128"'`) to force a string.
pub fn parse_arg(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Number(_) | Value::Bool(_) | Value::String(_) | Value::Null)) => value,
        _ => Value::String(raw.to_string()),
    }
}

fn print_result(result: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(())
}

/// Check the daemon answers and report the round trip.
pub async fn ping(client: &DaemonClient) -> Result<()> {
    let start = Instant::now();
    let reply = client.ping().await?;
    println!("{} from {} in {:?}", reply, client.addr(), start.elapsed());
    Ok(())
}

/// Print the daemon's status.
pub async fn status(client: &DaemonClient) -> Result<()> {
    let status = client.status().await?;
    println!("stagehand {} ({})", status.version, status.daemon);
    println!("  listening on  {}", status.listen);
    println!("  peer          {}", status.peer);
    println!("  reply port    {}", status.reply_port);
    println!("  pending       {}", status.pending);
    println!("  uptime        {}s", status.uptime_secs);
    Ok(())
}

/// Send a raw OSC address with arguments.
pub async fn send(client: &DaemonClient, address: &str, args: &[String]) -> Result<()> {
    let args = args.iter().map(|a| parse_arg(a)).collect();
    let result = client
        .send_osc(address, args)
        .await
        .with_context(|| format!("{} failed", address))?;
    print_result(&result)
}

/// Invoke a catalog tool with JSON parameters.
pub async fn call(client: &DaemonClient, name: &str, params: Option<&str>) -> Result<()> {
    let tool = catalog::find(name)?;
    let params: Value = match params {
        Some(raw) => serde_json::from_str(raw).context("Parameters must be a JSON object")?,
        None => Value::Null,
    };
    let invocation = tool.invocation(&params)?;

    let result = client
        .send_osc(invocation.address, invocation.args)
        .await
        .with_context(|| format!("{} failed", name))?;
    print_result(&result)
}

/// List the catalog.
pub fn tools() {
    for tool in catalog::TOOLS {
        let params: Vec<&str> = tool.params.iter().map(|p| p.name).collect();
        println!("{:<28} {}", tool.name, tool.description);
        if !params.is_empty() {
            println!("{:<28}   params: {}", "", params.join(", "));
        }
    }
}
