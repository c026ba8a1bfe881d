// Copyright 2024 TAKKT Industrial & Packaging GmbH
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

mod cli;
mod result;

use crate::{
    cli::{
        download::Download,
        upload::Upload,
    },
    result::Result,
};
use clap::Parser;
use tracing_subscriber::prelude::*;

#[derive(Debug, Parser)]
#[command(version)]
enum Cli {
    /// Upload a file to S3, resumable and in parallel parts.
    #[command(subcommand)]
    Upload(Upload),
    /// Download a file from S3, resumable and in parallel parts.
    #[command(subcommand)]
    Download(Download),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
                .with_file(true)
                .with_line_number(true)
                .with_target(false),
        )
        .with(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let command = Cli::parse();
    match command {
        Cli::Upload(cmd) => cmd.run().await,
        Cli::Download(cmd) => cmd.run().await,
    }
}
