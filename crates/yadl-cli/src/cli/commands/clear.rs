//! `yadl clear <file>` – delete the stored ledger for a source list.

use anyhow::Result;
use std::path::Path;
use yadl_core::ledger::{LedgerError, LedgerStore};
use yadl_core::source_list::batch_id;

pub fn run_clear(file: &Path) -> Result<()> {
    let store = LedgerStore::open_default()?;
    let id = batch_id(file);
    match store.delete(&id) {
        Ok(()) => {
            println!("Cleared batch {} for {}", id, file.display());
            Ok(())
        }
        Err(LedgerError::NotFound(_)) => {
            println!("No ledger for {}", file.display());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
