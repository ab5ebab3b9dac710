// Copyright © 2026 Pathway

pub mod elasticsearch;
