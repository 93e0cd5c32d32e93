// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic)]

use args::{CmdArgs, CniCommand, Parser};
use config::PluginConfigBuilder;
use interface_manager::KernelNamespaces;
use serde::Serialize;
use sriov::cni::{CniError, LATEST_VERSION};
use sriov::{ExecDelegate, Invocation, PacketSockets, Plugin, PluginError};
use std::io::Read;
use std::process::ExitCode;
use sysfs::Sysfs;
use tracectl::{LogLevel, init_tracing};
use tracing::{error, info};

fn print<T: Serialize>(value: &T) -> Result<(), PluginError> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, value).map_err(PluginError::Output)
}

fn fail(cni_version: &str, err: &PluginError) -> ExitCode {
    let code = err.code();
    error!("{err} (code {code})");
    let report = CniError {
        cni_version: cni_version.to_string(),
        code,
        msg: err.to_string(),
        details: std::error::Error::source(err)
            .map(ToString::to_string)
            .unwrap_or_default(),
    };
    // nothing left to report to if stdout is gone
    let _ = print(&report);
    ExitCode::FAILURE
}

fn invocation(args: &CmdArgs) -> Result<Invocation, PluginError> {
    let mut stdin = Vec::new();
    std::io::stdin()
        .read_to_end(&mut stdin)
        .map_err(PluginError::Stdin)?;
    Invocation::new(args, stdin)
}

fn dispatch(args: &CmdArgs, inv: &Invocation) -> Result<(), PluginError> {
    let level = LogLevel::from_config(inv.conf.log_level.as_deref())?;
    init_tracing(level, inv.conf.log_file.as_deref())?;
    info!(
        "{} for {} ({})",
        args.command(),
        inv.container_id,
        inv.ifname
    );

    let mut builder = PluginConfigBuilder::default();
    if let Some(dir) = &inv.conf.data_dir {
        builder.data_dir(dir.clone());
    }
    let config = builder.build()?;
    let namespaces = KernelNamespaces::new().map_err(PluginError::Host)?;
    let facts = Sysfs::new(config.sysfs_root.clone());
    let ipam = ExecDelegate::new(args.plugin_dirs());
    let plugin = Plugin::new(&config, &namespaces, &facts, &ipam, &PacketSockets);

    match args.command() {
        CniCommand::Add => print(&plugin.attach(inv)?),
        CniCommand::Del => plugin.detach(inv),
        CniCommand::Check => plugin.check(inv),
        CniCommand::Version => print(&sriov::version()),
    }
}

fn main() -> ExitCode {
    let args = CmdArgs::parse();
    if let CniCommand::Version = args.command() {
        return match print(&sriov::version()) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => fail(LATEST_VERSION, &err),
        };
    }
    let inv = match invocation(&args) {
        Ok(inv) => inv,
        Err(err) => return fail(LATEST_VERSION, &err),
    };
    match dispatch(&args, &inv) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => fail(&inv.cni_version(), &err),
    }
}
