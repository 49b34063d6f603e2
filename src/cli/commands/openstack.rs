//! OpenStack commands on one or all sites

use anyhow::{Context, Result, bail};
use clap::Args;
use serde_json::json;
use std::sync::Arc;

use crate::cli::args::{OidcArgs, SiteVoArgs, is_all_sites};
use crate::config::Config;
use crate::dispatch::{DispatchReport, SiteDispatcher, SiteOutcome, SiteReport};
use crate::federation::{FederationExchange, SiteDirectory};
use crate::openstack::{self, CallMode, ClientSettings, CommandOutput, OPENSTACK_CLIENT, OpenStackCommand};

/// Exit code reported when the VO has no project on the site.
pub const MISSING_VO_EXIT_CODE: i32 = 11;

#[derive(Args)]
pub struct OpenstackArgs {
    #[command(flatten)]
    pub oidc: OidcArgs,

    #[command(flatten)]
    pub target: SiteVoArgs,

    /// Ignore sites that do not support the VO
    #[arg(short, long)]
    pub ignore_missing_vo: bool,

    /// Print output as one JSON array
    #[arg(short, long)]
    pub json_output: bool,

    /// Authenticate with a project-scoped Keystone token instead of the access token
    #[arg(long)]
    pub scoped_token: bool,

    /// OpenStack command, e.g. `server list --long`
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

#[derive(Args)]
pub struct OpenstackIntArgs {
    #[command(flatten)]
    pub oidc: OidcArgs,

    #[command(flatten)]
    pub target: SiteVoArgs,
}

fn require_client() -> Result<()> {
    if openstack::find_executable(OPENSTACK_CLIENT).is_none() {
        bail!("OpenStack command-line client \"{}\" not found", OPENSTACK_CLIENT);
    }
    Ok(())
}

fn load_sites(config: &Config) -> Result<SiteDirectory> {
    let directory = SiteDirectory::load(&config.site_config_dir)?;
    if directory.is_empty() {
        bail!(
            "No site configurations found in {}",
            config.site_config_dir.display()
        );
    }
    Ok(directory)
}

pub async fn openstack_command(args: OpenstackArgs, config: &Config) -> Result<i32> {
    require_client()?;
    let resolved = args.oidc.resolve(config).await?;
    let directory = Arc::new(load_sites(config)?);

    let site = args.target.site(config);
    let vo = args.target.vo(config);
    let single_site = !is_all_sites(&site);
    let sites = if single_site {
        vec![site]
    } else {
        directory.list_sites()
    };

    let mut operation = OpenStackCommand::new(
        resolved.credential,
        vo,
        args.command,
        directory,
        ClientSettings::from_config(config),
    )
    .json_output(args.json_output);
    if args.scoped_token {
        let exchange = FederationExchange::new(config).context("Failed to create HTTP client")?;
        operation = operation.mode(CallMode::ScopedToken(exchange));
    }
    let operation = Arc::new(operation);

    let mut printer = ResultPrinter {
        vo: operation.vo().to_string(),
        command: operation.command_line(),
        json_output: args.json_output,
        ignore_missing_vo: args.ignore_missing_vo,
        printed: 0,
    };
    let report = SiteDispatcher::from_config(config)
        .dispatch_streaming(&sites, operation, |site_report| printer.print(site_report))
        .await;
    if args.json_output {
        if printer.printed == 0 {
            println!("[");
        }
        println!("]");
    }

    Ok(exit_code(&report, single_site))
}

/// The site's own code in single-site mode, otherwise whether any site
/// succeeded.
fn exit_code(report: &DispatchReport<CommandOutput>, single_site: bool) -> i32 {
    if !single_site {
        return report.exit_code();
    }
    match report.visible(false).first().map(|r| &r.outcome) {
        Some(SiteOutcome::Succeeded { .. }) => 0,
        Some(SiteOutcome::CommandError { code, .. }) => *code,
        Some(SiteOutcome::MissingResource { .. }) => MISSING_VO_EXIT_CODE,
        _ => 1,
    }
}

/// Prints outcomes as they arrive, first come first served.
struct ResultPrinter {
    vo: String,
    command: String,
    json_output: bool,
    ignore_missing_vo: bool,
    printed: usize,
}

impl ResultPrinter {
    fn print(&mut self, report: &SiteReport<CommandOutput>) {
        if self.ignore_missing_vo && report.outcome.is_missing_resource() {
            return;
        }
        if self.json_output {
            println!("{}", if self.printed == 0 { "[" } else { "," });
            let entry = self.json_entry(report);
            println!(
                "{}",
                serde_json::to_string_pretty(&entry).unwrap_or_else(|_| entry.to_string())
            );
        } else {
            println!(
                "Site: {}, VO: {}, command: {}",
                report.site, self.vo, self.command
            );
            match &report.outcome {
                SiteOutcome::Succeeded { result } => println!("{}", result),
                SiteOutcome::CommandError { code, message } => {
                    println!("Error code: {}", code);
                    println!("Error message: {}", message.trim_end());
                }
                SiteOutcome::MissingResource { message } => {
                    println!("Error code: {}", MISSING_VO_EXIT_CODE);
                    println!("Error message: {}", message);
                }
                other => {
                    println!(
                        "{} generated an exception: {}",
                        report.site,
                        other.error_message().unwrap_or_default()
                    );
                }
            }
        }
        self.printed += 1;
    }

    fn json_entry(&self, report: &SiteReport<CommandOutput>) -> serde_json::Value {
        let (exception, code, result) = match &report.outcome {
            SiteOutcome::Succeeded { result } => (None, 0, serde_json::to_value(result).unwrap_or_default()),
            SiteOutcome::CommandError { code, message } => (None, *code, json!(message)),
            SiteOutcome::MissingResource { message } => (None, MISSING_VO_EXIT_CODE, json!(message)),
            other => (other.error_message(), 1, serde_json::Value::Null),
        };
        json!({
            "Site": report.site,
            "VO": self.vo,
            "command": self.command,
            "Exception": exception,
            "Error code": code,
            "Result": result,
        })
    }
}

pub async fn openstack_int_command(args: OpenstackIntArgs, config: &Config) -> Result<i32> {
    require_client()?;
    let site = args.target.site(config);
    if is_all_sites(&site) {
        bail!("Cannot start an interactive session on ALL_SITES");
    }
    let vo = args.target.vo(config);
    let resolved = args.oidc.resolve(config).await?;
    let directory = load_sites(config)?;

    openstack::interactive(
        &directory,
        &site,
        &vo,
        &resolved.credential,
        &ClientSettings::from_config(config),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn printer(json_output: bool) -> ResultPrinter {
        ResultPrinter {
            vo: "vo.access.egi.eu".to_string(),
            command: "server list".to_string(),
            json_output,
            ignore_missing_vo: true,
            printed: 0,
        }
    }

    fn report(outcome: SiteOutcome<CommandOutput>) -> SiteReport<CommandOutput> {
        SiteReport {
            site: "IFCA-LCG2".to_string(),
            outcome,
            elapsed: std::time::Duration::ZERO,
        }
    }

    #[test]
    fn test_json_entry_for_success() {
        let entry = printer(true).json_entry(&report(SiteOutcome::Succeeded {
            result: CommandOutput::Json(json!([{"ID": "abc"}])),
        }));
        assert_eq!(entry["Site"], "IFCA-LCG2");
        assert_eq!(entry["Error code"], 0);
        assert_eq!(entry["Result"][0]["ID"], "abc");
        assert!(entry["Exception"].is_null());
    }

    #[test]
    fn test_json_entry_for_transport_failure() {
        let entry = printer(true).json_entry(&report(SiteOutcome::TransportError {
            kind: crate::error::TransportErrorKind::Timeout,
            message: "no result within 300s".to_string(),
        }));
        assert_eq!(entry["Error code"], 1);
        assert!(entry["Exception"].as_str().unwrap().contains("timeout"));
    }

    #[test]
    fn test_suppressed_missing_vo_is_not_counted_as_printed() {
        let mut printer = printer(false);
        printer.print(&report(SiteOutcome::MissingResource {
            message: "VO x not found on site IFCA-LCG2".to_string(),
        }));
        assert_eq!(printer.printed, 0);
    }
}
