//! `lsync sign` command.

use anyhow::Result;
use clap::Args;
use lsync_host::CollectionKind;
use lsync_host::mac::{self, MAC_HEADER};

use super::collection_secret;
use crate::opts::GlobalOpts;
use crate::output::print_value;
use crate::util::host_config;

#[derive(Args, Debug)]
pub struct SignArgs {
    /// Collection whose secret signs the body
    #[arg(long)]
    pub collection: CollectionKind,

    /// Raw request body
    #[arg(long, default_value = "{}")]
    pub body: String,
}

pub fn cmd_sign(opts: &GlobalOpts, args: &SignArgs) -> Result<()> {
    let config = host_config()?;
    let secret = collection_secret(&config, args.collection)?;
    let tag = mac::sign(args.body.as_bytes(), &secret);
    let data = serde_json::json!({
        "collection": args.collection,
        "header": MAC_HEADER,
        "tag": tag,
    });
    print_value(opts, &data, || tag.clone())
}
