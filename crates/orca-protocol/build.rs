// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
use std::io::Result;

fn main() -> Result<()> {
    // Compile the Orca wire contract: the core services (register/emit/expose)
    // and the processor services the core consumes (health check, DAG parts)
    tonic_build::configure().compile_protos(&["proto/orca.proto"], &["proto/"])?;

    Ok(())
}
