//! `lsync ping` command.

use anyhow::{Context, Result};
use clap::Args;
use lsync_host::CollectionKind;
use lsync_host::mac::{self, MAC_HEADER};

use super::collection_secret;
use crate::opts::GlobalOpts;
use crate::output::print_value;
use crate::util::host_config;

#[derive(Args, Debug)]
pub struct PingArgs {
    /// Base URL of a running server, e.g. http://127.0.0.1:8787
    pub url: String,

    #[arg(long)]
    pub collection: CollectionKind,

    /// Raw request body
    #[arg(long, default_value = "{}")]
    pub body: String,
}

pub async fn cmd_ping(opts: &GlobalOpts, args: &PingArgs) -> Result<()> {
    let config = host_config()?;
    let secret = collection_secret(&config, args.collection)?;
    let tag = mac::sign(args.body.as_bytes(), &secret);
    let url = format!(
        "{}/webhook/{}",
        args.url.trim_end_matches('/'),
        args.collection
    );

    let response = reqwest::Client::new()
        .post(&url)
        .header(MAC_HEADER, tag)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(args.body.clone())
        .send()
        .await
        .with_context(|| format!("POST {url}"))?;
    let status = response.status();
    let text = response.text().await.context("read response body")?;
    let body = serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text.clone()));

    let data = serde_json::json!({
        "url": url,
        "status": status.as_u16(),
        "body": body,
    });
    print_value(opts, &data, || format!("{status} {text}"))?;
    if !status.is_success() {
        anyhow::bail!("webhook rejected with {status}");
    }
    Ok(())
}
