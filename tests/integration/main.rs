// Copyright © 2026 Pathway

mod helpers;

mod test_bulk;
mod test_executor;
