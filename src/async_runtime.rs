// Copyright © 2026 Pathway

use std::io;

use tokio::runtime::Runtime as TokioRuntime;

/// Every cluster session drives its requests on its own current-thread runtime,
/// so a session can be used from any engine thread without a shared executor.
pub fn create_async_tokio_runtime() -> Result<TokioRuntime, io::Error> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .thread_name("pathway:elastic-session")
        .build()
}
