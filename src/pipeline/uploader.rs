//! Transfer stage: sealed containers go to the remote store while packing continues.

use crossbeam_channel::{Receiver, Sender};
use std::path::PathBuf;

use crate::engine::transfer::{RemoteRef, RemoteStore, put_with_retries};
use crate::error::TransferError;
use crate::types::ContainerId;

pub struct TransferJob {
    pub id: ContainerId,
    pub path: PathBuf,
}

pub struct TransferOutcome {
    pub id: ContainerId,
    pub path: PathBuf,
    pub result: Result<RemoteRef, TransferError>,
}

/// Put each job (with retries) and report the outcome. Ends when the job channel closes.
pub fn run_upload_loop(
    store: &dyn RemoteStore,
    retries: u32,
    job_rx: Receiver<TransferJob>,
    outcome_tx: Sender<TransferOutcome>,
) -> usize {
    let mut done = 0_usize;
    while let Ok(job) = job_rx.recv() {
        log::debug!("Transferring {} to {}", job.id, store.describe());
        let result = put_with_retries(store, &job.path, retries);
        done += 1;
        if outcome_tx
            .send(TransferOutcome {
                id: job.id,
                path: job.path,
                result,
            })
            .is_err()
        {
            break;
        }
    }
    done
}
