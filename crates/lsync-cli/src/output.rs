//! Human mode prints a short summary; JSON mode prints the full value.

use anyhow::Result;
use serde_json::Value;

use crate::opts::GlobalOpts;

pub fn print_value(opts: &GlobalOpts, data: &Value, summary: impl FnOnce() -> String) -> Result<()> {
    if opts.pretty {
        println!("{}", serde_json::to_string_pretty(data)?);
    } else if opts.json {
        println!("{}", serde_json::to_string(data)?);
    } else {
        println!("{}", summary());
    }
    Ok(())
}
