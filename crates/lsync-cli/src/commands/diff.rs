//! `lsync diff` command.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use lsync_host::clock::SystemClock;
use lsync_host::{CollectionKind, Reconciler};

use crate::opts::GlobalOpts;
use crate::output::print_value;
use crate::util::{build_stores, host_config};

#[derive(Args, Debug)]
pub struct DiffArgs {
    #[arg(long)]
    pub collection: CollectionKind,
}

pub async fn cmd_diff(opts: &GlobalOpts, args: &DiffArgs) -> Result<()> {
    let config = host_config()?;
    let (table, ledger) = build_stores(&config, false)?;
    let reconciler = Reconciler::new(table, ledger, Arc::new(SystemClock));
    let strategy = config
        .collection(args.collection)
        .map(|c| c.merge_strategy())
        .unwrap_or_default();

    let result = reconciler.reconcile(args.collection, &strategy).await?;
    let data = serde_json::json!({
        "collection": args.collection,
        "changed": result.changed,
        "next_state": result.next_state,
    });
    print_value(opts, &data, || {
        if result.changed {
            format!(
                "{}: out of date, {} record(s) would be committed",
                args.collection,
                result.next_state.len()
            )
        } else {
            format!("{}: up to date", args.collection)
        }
    })
}
