/// Magnum cluster template setup
use crate::Error::*;
use crate::platform::Platform;
use crate::provision::Provisioner;
use clap::{Parser, Subcommand, ValueEnum};
use log::{debug, error, info};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

mod auth;
mod config;
#[cfg(test)]
mod http_stub;
mod image;
mod logging;
mod openstack;
mod platform;
mod provision;
mod readiness;
mod template;

/// Prepare an OpenStack cloud to create Kubernetes clusters with Magnum.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true)]
    config: Option<String>,

    /// Append log output to this file, in addition to standard error.
    #[arg(long, global = true)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Resolve the base image, create the cluster template and verify that it exists.
    Provision,
    /// Resolve the base image and print the cluster template request without submitting it.
    Plan {
        #[arg(long, value_enum, default_value_t = Output::Text)]
        output: Output,
    },
    /// List the image catalog, marking the image that would be selected.
    Images {
        /// Override the image name pattern from the configuration.
        #[arg(long)]
        pattern: Option<String>,
        #[arg(long, value_enum, default_value_t = Output::Text)]
        output: Output,
    },
    /// List the cluster templates known to the platform.
    Templates {
        #[arg(long, value_enum, default_value_t = Output::Text)]
        output: Output,
    },
    /// Print the built-in default configuration.
    DefaultConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
enum Output {
    Text,
    Json,
    Yaml,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration file: {0}")]
    Config(#[from] config::Error),

    #[error("logging: {0}")]
    Logging(#[from] logging::Error),

    #[error("authentication: {0}")]
    Auth(#[from] auth::Error),

    #[error("platform: {0}")]
    Platform(#[from] platform::Error),

    #[error("{0}")]
    Provision(#[from] provision::Error),

    #[error("serialize json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("serialize yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    fn exit_code(&self) -> i32 {
        match self {
            Provision(err) => err.exit_code(),
            _ => 1,
        }
    }
}

/// Read configuration file from disk and merge it with the
/// `default.toml` [built-in config](../default.toml).
///
/// If a configuration file name is not set explicitly, this function will
/// detect whether a config file with the default file name exists in the
/// working directory. If it does, it is used implicitly.
fn read_config(args: &Cli) -> Result<config::File, Error> {
    const DEFAULT_CONFIG_FILE: &str = "coe-setup.toml";

    let config_file = match &args.config {
        None => {
            if std::fs::metadata(DEFAULT_CONFIG_FILE)
                .map(|metadata| metadata.is_file())
                .unwrap_or(false)
            {
                Some(DEFAULT_CONFIG_FILE.to_string())
            } else {
                None
            }
        }
        Some(c) => Some(c.clone()),
    };

    Ok(if let Some(config_file) = config_file {
        config::File::default_with_user_config_file(&config_file)?
    } else {
        config::File::default()
    })
}

#[tokio::main]
async fn main() {
    match run(Cli::parse()).await {
        Ok(_) => std::process::exit(0),
        Err(err) => {
            if log::max_level() == log::LevelFilter::Off {
                // failed before logging was set up
                eprintln!("fatal: {}", err);
                std::process::exit(err.exit_code())
            }
            if let Provision(provision_err) = &err {
                error!("step '{}' failed", provision_err.step());
            }
            error!("fatal: {}", err.to_string());
            std::process::exit(err.exit_code())
        }
    }
}

async fn run(args: Cli) -> Result<(), Error> {
    if let Commands::DefaultConfig = args.command {
        print!("{}", config::DEFAULT_CONFIG);
        return Ok(());
    }

    let cfg = read_config(&args)?;

    let log_file = args.log_file.clone().or_else(|| cfg.log_file.clone());
    logging::init(log_file.as_deref())?;

    info!("coe-setup {}", env!("CARGO_PKG_VERSION"));
    if let Some(description) = &cfg.description {
        debug!("Configuration: {description}");
    }
    if let Some(path) = &log_file {
        debug!("Logging to {path}");
    }

    let client = connect(&cfg).await?;

    match args.command {
        Commands::Provision => {
            let report = Provisioner::new(&client, &cfg).run().await?;
            info!(
                "Done: image '{}' ({}), cluster template '{}' ({}){}",
                report.image.record().name,
                report.image.record().id,
                report.template.name,
                report.template.uuid,
                if report.reused { ", reused" } else { "" }
            );
            Ok(())
        }
        Commands::Plan { output } => {
            let image = Provisioner::new(&client, &cfg).resolve_image().await?;
            let spec = template::ClusterTemplateSpec::new(&cfg.template, &image);
            print_plan(&spec, output)
        }
        Commands::Images { pattern, output } => {
            let pattern = pattern.unwrap_or_else(|| cfg.image.pattern.clone());
            let images = client.list_images().await?;
            print_images(&images, &pattern, output)
        }
        Commands::Templates { output } => {
            let templates = client.list_templates().await?;
            print_templates(&templates, output)
        }
        Commands::DefaultConfig => Ok(()),
    }
}

/// Authenticate, retrying with backoff while the identity service comes up.
async fn connect(cfg: &config::File) -> Result<openstack::Client, Error> {
    let credentials = auth::Credentials::try_new_from_env()?;
    let timeout = Duration::from_secs(cfg.http.timeout_secs);
    let readiness = readiness::Config::from(&cfg.readiness);

    info!("Authenticating as {} at {}", credentials.username, credentials.auth_url);
    let session = wait_for_session(&readiness, || auth::authenticate(&credentials, timeout)).await?;

    Ok(openstack::Client::new(session, timeout)?)
}

/// Retry `authenticate` while Keystone is unavailable.
///
/// Running out of time is a readiness failure. Any other authentication
/// error (bad credentials, missing endpoints) is reported as is.
async fn wait_for_session<F, Fut>(readiness: &readiness::Config, authenticate: F) -> Result<auth::Session, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<auth::Session, auth::Error>>,
{
    readiness::wait_for(readiness, "authenticate", auth::Error::is_transient, authenticate)
        .await
        .map_err(|err| match err {
            readiness::Error::Timeout(timeout) => Provision(provision::Error::NotReady(timeout)),
            readiness::Error::Permanent(err) => Auth(err),
        })
}

fn serialize<T: Serialize + ?Sized>(value: &T, output: Output) -> Result<Option<String>, Error> {
    Ok(match output {
        Output::Text => None,
        Output::Json => Some(serde_json::to_string_pretty(value)?),
        Output::Yaml => Some(serde_yaml::to_string(value)?),
    })
}

fn print_plan(spec: &template::ClusterTemplateSpec, output: Output) -> Result<(), Error> {
    if let Some(serialized) = serialize(spec, output)? {
        println!("{serialized}");
        return Ok(());
    }
    println!("name:              {}", spec.name);
    println!("coe:               {}", spec.coe);
    println!("image:             {}", spec.image);
    println!("keypair:           {}", spec.keypair);
    println!("external network:  {}", spec.external_network);
    println!("dns nameserver:    {}", spec.dns_nameserver);
    println!("master flavor:     {}", spec.master_flavor);
    println!("worker flavor:     {}", spec.flavor);
    println!("volume size (GB):  {}", spec.docker_volume_size);
    println!("network driver:    {}", spec.network_driver);
    for (key, value) in &spec.labels {
        println!("label:             {key}={value}");
    }
    Ok(())
}

fn print_images(images: &[image::ImageRecord], pattern: &str, output: Output) -> Result<(), Error> {
    if let Some(serialized) = serialize(images, output)? {
        println!("{serialized}");
        return Ok(());
    }
    let selected = image::resolve(images, pattern).ok();
    for record in images {
        let marker = match &selected {
            Some(selection) if selection.record() == record => "*",
            _ if image::matches(record, pattern) => "+",
            _ => " ",
        };
        println!("{marker} {:<36} {}", record.id, record.name);
    }
    Ok(())
}

fn print_templates(templates: &[template::ClusterTemplateRecord], output: Output) -> Result<(), Error> {
    if let Some(serialized) = serialize(templates, output)? {
        println!("{serialized}");
        return Ok(());
    }
    for record in templates {
        println!(
            "{:<36} {:<24} {}",
            record.uuid,
            record.name,
            record.coe.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
