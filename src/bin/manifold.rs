//! manifold: manifoldd CLI client
//!
//! Control and test interface for manifoldd.

use clap::{Parser, Subcommand};
use manifold::client::ServiceClient;
use manifold::{
    GenerationRequest, HelmOverrides, InvalidationSignal, KustomizeOverrides, RepoGateway,
};

/// Manifold CLI client
#[derive(Parser)]
#[command(name = "manifold")]
#[command(version = manifold::PKG_VERSION)]
#[command(about = "Manifold repository server client")]
struct Args {
    /// Server address
    #[arg(
        short,
        long,
        env = "MANIFOLD_ADDRESS",
        default_value = "http://127.0.0.1:8081"
    )]
    address: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check service health
    Health,

    /// Generate manifests for an application source
    Generate {
        /// Repository URL
        repo: String,
        /// Commit SHA or other resolved revision
        revision: String,
        /// Path of the application inside the repository
        #[arg(default_value = "")]
        path: String,
        /// Include subdirectories
        #[arg(long)]
        recurse: bool,
        /// Target namespace
        #[arg(short, long, default_value = "")]
        namespace: String,
        /// Application name
        #[arg(long, default_value = "")]
        app_name: String,
        /// Bypass the server-side result cache
        #[arg(long)]
        no_cache: bool,
        /// Helm values file (repeatable, order matters)
        #[arg(long = "values")]
        values_files: Vec<String>,
        /// Helm parameter as name=value (repeatable)
        #[arg(long = "set", value_parser = parse_key_value)]
        parameters: Vec<(String, String)>,
        /// Kustomize image override (repeatable)
        #[arg(long = "image")]
        images: Vec<String>,
    },

    /// List applications in a repository
    Apps {
        repo: String,
        revision: String,
    },

    /// Show details of one application
    Details {
        repo: String,
        revision: String,
        #[arg(default_value = "")]
        path: String,
    },

    /// Show commit metadata for a revision
    Metadata {
        repo: String,
        revision: String,
    },

    /// Drop cached results on the server
    Invalidate {
        #[command(subcommand)]
        target: InvalidateTarget,
    },
}

#[derive(Subcommand)]
enum InvalidateTarget {
    /// Everything rendered from one repository
    Repo { url: String },
    /// Repository credentials were rotated
    Credentials { url: String },
    /// The signing keyring changed
    Keyring,
    /// Everything
    All,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected name=value, got {raw:?}"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let client = ServiceClient::connect(&args.address).await?;

    match args.command {
        Command::Health => {
            client.health().await?;
            println!("ok ({})", client.server_version().await?);
        }

        Command::Generate {
            repo,
            revision,
            path,
            recurse,
            namespace,
            app_name,
            no_cache,
            values_files,
            parameters,
            images,
        } => {
            let mut request = GenerationRequest::new(repo, revision)
                .path(path)
                .recurse(recurse)
                .namespace(namespace)
                .app_name(app_name)
                .no_cache(no_cache);
            if !values_files.is_empty() || !parameters.is_empty() {
                request = request.helm(HelmOverrides {
                    values_files,
                    parameters: parameters.into_iter().collect(),
                    ..Default::default()
                });
            }
            if !images.is_empty() {
                request = request.kustomize(KustomizeOverrides {
                    images,
                    ..Default::default()
                });
            }

            let response = client.generate_manifest(&request).await?;
            for (i, manifest) in response.manifests.iter().enumerate() {
                if i > 0 {
                    println!("---");
                }
                println!("{manifest}");
            }
            eprintln!(
                "# {} manifests, {} source at {}",
                response.manifests.len(),
                response.source_type,
                response.revision
            );
        }

        Command::Apps { repo, revision } => {
            let apps = client.list_apps(&repo, &revision).await?;
            if apps.is_empty() {
                println!("no applications found");
            }
            for (path, source_type) in apps {
                println!("{path:<40} {source_type}");
            }
        }

        Command::Details {
            repo,
            revision,
            path,
        } => {
            let request = GenerationRequest::new(repo, revision).path(path);
            let details = client.app_details(&request).await?;
            println!("Path:        {}", details.path);
            println!("Source type: {}", details.source_type);
            println!("Files:");
            for file in &details.manifest_files {
                println!("  {file}");
            }
        }

        Command::Metadata { repo, revision } => {
            let metadata = client.revision_metadata(&repo, &revision).await?;
            println!("Author:  {}", metadata.author);
            println!("Date:    {}", metadata.date_unix);
            if !metadata.tags.is_empty() {
                println!("Tags:    {}", metadata.tags.join(", "));
            }
            println!();
            println!("{}", metadata.message);
        }

        Command::Invalidate { target } => {
            let signal = match target {
                InvalidateTarget::Repo { url } => InvalidationSignal::Repository(url),
                InvalidateTarget::Credentials { url } => InvalidationSignal::CredentialsChanged(url),
                InvalidateTarget::Keyring => InvalidationSignal::KeyringChanged,
                InvalidateTarget::All => InvalidationSignal::All,
            };
            client.invalidate(signal).await?;
            println!("invalidated");
        }
    }

    Ok(())
}
