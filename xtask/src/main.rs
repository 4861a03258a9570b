// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use anyhow::Context;
use anyhow::Result;
use cargo_metadata::Metadata;
use clap::Args;
use clap::Parser;
use std::process::Command;
use std::sync::OnceLock;
use tcbpf::engine::mode::Mode;
use tcbpf::engine::mode::TcFlags;

static METADATA: OnceLock<Metadata> = OnceLock::new();
fn cargo_meta() -> Result<&'static Metadata> {
    if let Some(meta) = METADATA.get() {
        return Ok(meta);
    }

    let meta = cargo_metadata::MetadataCommand::new()
        .exec()
        .context("failed to read cargo metadata")?;
    Ok(METADATA.get_or_init(|| meta))
}

/// The variable `lib/tcbpf/build.rs` reads the variant mask from.
const FLAGS_VAR: &str = "TCBPF_COMPILE_FLAGS";

/// Development functions for tcbpf.
#[derive(Debug, Parser)]
enum Xtask {
    /// List the mask of every buildable program variant.
    Variants,

    /// Check the library once per variant, and check that an
    /// inconsistent mask is refused.
    Check(CheckOptions),
}

#[derive(Debug, Args)]
struct CheckOptions {
    /// Check with `--release`.
    #[arg(long)]
    release: bool,

    /// Cross-check for this target (e.g. `bpfel-unknown-none`), which
    /// builds without `std`.
    #[arg(long)]
    target: Option<String>,

    /// Skip checking that an inconsistent mask fails the build.
    #[arg(long)]
    skip_reject: bool,
}

fn main() -> Result<()> {
    let cmd = Xtask::parse();
    match cmd {
        Xtask::Variants => {
            for mode in Mode::variants() {
                println!("{:#x}\t{mode}", mode.flags().bits());
            }
            Ok(())
        }

        Xtask::Check(opts) => cmd_check(&opts),
    }
}

fn cmd_check(opts: &CheckOptions) -> Result<()> {
    for mode in Mode::variants() {
        let bits = mode.flags().bits();
        println!("Checking variant {bits:#x} ({mode}).");
        check_variant(bits, opts)
            .with_context(|| format!("variant {bits:#x} failed"))?;
    }

    if !opts.skip_reject {
        let bad = TcFlags::CGROUP.union(TcFlags::INGRESS).bits();
        println!("Checking that mask {bad:#x} is refused.");
        if check_variant(bad, opts).is_ok() {
            anyhow::bail!("inconsistent mask {bad:#x} built successfully");
        }
    }

    Ok(())
}

fn check_variant(bits: u32, opts: &CheckOptions) -> Result<()> {
    let meta = cargo_meta()?;
    let cargo =
        std::env::var("CARGO").unwrap_or_else(|_| String::from("cargo"));

    // One target directory per variant.
    let target_dir = meta.target_directory.join(format!("variants/{bits:#x}"));

    let mut command = Command::new(&cargo);
    command.args(["check", "-p", "tcbpf"]);
    if opts.release {
        command.arg("--release");
    }
    if let Some(target) = &opts.target {
        command.args(["--no-default-features", "--target", target]);
    }
    command
        .arg("--target-dir")
        .arg(target_dir.as_std_path())
        .env(FLAGS_VAR, format!("{bits:#x}"))
        .current_dir(meta.workspace_root.as_std_path());

    command.output_nocapture()
}

trait CommandNoCapture {
    fn output_nocapture(&mut self) -> Result<()>;
}

impl CommandNoCapture for Command {
    fn output_nocapture(&mut self) -> Result<()> {
        let status = self
            .spawn()
            .context("failed to spawn child cargo invocation")?
            .wait()
            .context("failed to await child cargo invocation")?;

        if status.success() {
            Ok(())
        } else {
            anyhow::bail!("failed to run (status {status})")
        }
    }
}
