//! Credential Broker - browser-based OIDC login to short-lived cloud role
//! credentials.

use std::process::ExitCode;
use std::sync::Arc;

use broker_core::role;
use chrono::Utc;
use clap::Parser;
use tracing::{debug, error};

use credential_broker::{
    EnvironmentClass, Result,
    authz::{
        self, AuthorizationService, AuthzClient, DirectoryLookup, HttpDirectory, RoleAssumer,
        StaticDirectory,
    },
    cli::{Cli, Command, ConsoleArgs, CredsArgs},
    config::BrokerConfig,
    console::ConsoleSignin,
    credential_process::CredentialProcessOutput,
    oidc::{
        Authenticator, BrowserLauncher, IdentityVerifier, LoginEngine, OidcVerifier,
        SystemBrowser,
    },
    session::{self, CloudCredentials, CloudProvider, IdentityCache},
    setup_tracing,
    store::{self, FileStore, SecureStore},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let ctx = Context::new(&cli)?;

    match cli.command {
        Command::Login => run_login(&ctx).await,
        Command::Refresh => run_refresh(&ctx).await,
        Command::Groups => run_groups(&ctx).await,
        Command::Creds(args) => {
            let (_, creds) = retrieve(&ctx, &args).await?;
            println!("export AWS_ACCESS_KEY_ID={}", creds.access_key_id);
            println!("export AWS_SECRET_ACCESS_KEY={}", creds.secret_access_key);
            println!("export AWS_SESSION_TOKEN={}", creds.session_token);
            eprintln!("Credentials expire at {}", creds.expiration);
            Ok(())
        }
        Command::Cproc(args) => {
            let (_, creds) = retrieve(&ctx, &args).await?;
            println!("{}", CredentialProcessOutput::from(&creds).to_json()?);
            Ok(())
        }
        Command::Console(args) => run_console(&ctx, &args).await,
        Command::Info { profile } => {
            println!("{}", ctx.provider(&profile, false)?.status(Utc::now())?);
            Ok(())
        }
        Command::Logout { profile, all } => run_logout(&ctx, profile.as_deref(), all),
        Command::Serve => run_server(&ctx).await,
    }
}

/// Everything a command needs, built once from the CLI and configuration.
struct Context {
    config: Arc<BrokerConfig>,
    stage: String,
    class: EnvironmentClass,
    http: reqwest::Client,
    verifier: Arc<dyn IdentityVerifier>,
}

impl Context {
    fn new(cli: &Cli) -> Result<Self> {
        let config = BrokerConfig::load(cli.config.as_deref())?;
        let stage = cli.stage.clone().unwrap_or_else(|| config.stage.clone());
        let class = cli.environment.unwrap_or(config.environment);
        let http = config.http.client()?;
        debug!(stage = %stage, class = %class, "Configuration loaded");

        Ok(Self {
            verifier: Arc::new(OidcVerifier::new(http.clone())),
            config: Arc::new(config),
            stage,
            class,
            http,
        })
    }

    fn store(&self) -> Result<Arc<dyn SecureStore>> {
        Ok(Arc::new(FileStore::new(self.config.store_dir()?)?))
    }

    fn identity_cache(&self, store: Arc<dyn SecureStore>) -> IdentityCache {
        IdentityCache::new(
            store,
            Arc::clone(&self.config),
            self.http.clone(),
            Arc::clone(&self.verifier),
        )
    }

    fn login_engine(&self) -> Result<LoginEngine> {
        LoginEngine::new(
            &self.config,
            &self.stage,
            self.class,
            self.http.clone(),
            Arc::clone(&self.verifier),
        )
    }

    fn provider(&self, profile: &str, interactive: bool) -> Result<CloudProvider> {
        let store = self.store()?;
        let provider = CloudProvider::new(
            &self.config,
            profile,
            &self.stage,
            self.class,
            Arc::clone(&store),
            self.identity_cache(store),
            Arc::new(AuthzClient::new(self.http.clone(), Arc::clone(&self.config))),
        );
        if interactive {
            let engine: Arc<dyn Authenticator> = Arc::new(self.login_engine()?);
            Ok(provider.with_authenticator(engine))
        } else {
            Ok(provider)
        }
    }
}

async fn run_login(ctx: &Context) -> Result<()> {
    let session = ctx.login_engine()?.login().await?;
    ctx.identity_cache(ctx.store()?).store(&session)?;
    eprintln!(
        "Logged in ({}, {}); session valid until {}",
        session.stage, session.environment, session.expiry
    );
    Ok(())
}

async fn run_refresh(ctx: &Context) -> Result<()> {
    let session = ctx
        .identity_cache(ctx.store()?)
        .refresh(&ctx.stage, ctx.class)
        .await?;
    eprintln!(
        "Refreshed ({}, {}); session valid until {}",
        session.stage, session.environment, session.expiry
    );
    Ok(())
}

async fn run_groups(ctx: &Context) -> Result<()> {
    let groups = ctx
        .provider(credential_broker::cli::DEFAULT_PROFILE, true)?
        .groups()
        .await?;
    if groups.is_empty() {
        eprintln!("No roles are permitted for this identity");
    }
    for arn in groups {
        println!("{arn}");
    }
    Ok(())
}

/// Credentials for the requested role and the role they were issued for.
async fn retrieve(ctx: &Context, args: &CredsArgs) -> Result<(String, CloudCredentials)> {
    let provider = ctx.provider(&args.profile, !args.no_login)?;
    let role_arn = provider.resolve_role(args.role_arn.as_deref()).await?;
    debug!(profile = provider.profile(), role_arn = %role_arn, "Resolved role");
    let creds = provider.retrieve(&role_arn, args.duration).await?;
    Ok((role_arn, creds))
}

async fn run_console(ctx: &Context, args: &ConsoleArgs) -> Result<()> {
    let (role_arn, creds) = retrieve(ctx, &args.creds).await?;
    let url = ConsoleSignin::new(ctx.http.clone(), ctx.config.console.clone())
        .signin_url(&creds, args.region.as_deref())
        .await?;
    let role = role::role_name_of(&role_arn).unwrap_or(&role_arn);

    if args.stdout {
        eprintln!("Console sign-in URL for: {role}");
        println!("{url}");
        Ok(())
    } else {
        eprintln!("Opening console for: {role}");
        SystemBrowser.launch(url.as_str())
    }
}

fn run_logout(ctx: &Context, profile: Option<&str>, all: bool) -> Result<()> {
    let store = ctx.store()?;
    if all {
        let identities = ctx.identity_cache(Arc::clone(&store)).delete_all()?;
        let clouds = session::delete_all_cloud_sessions(store.as_ref())?;
        eprintln!("Removed {identities} identity and {clouds} cloud session(s)");
    } else if let Some(profile) = profile {
        store.remove(&store::cloud_key(profile))?;
        eprintln!("Removed cloud session for profile {profile}");
    } else {
        ctx.identity_cache(store).delete(&ctx.stage, ctx.class)?;
        eprintln!("Removed identity session ({}, {})", ctx.stage, ctx.class);
    }
    Ok(())
}

async fn run_server(ctx: &Context) -> Result<()> {
    let directory: Arc<dyn DirectoryLookup> = match ctx.config.server.directory.url {
        Some(ref url) => Arc::new(HttpDirectory::new(ctx.http.clone(), url.clone())),
        None => Arc::new(StaticDirectory::new(
            ctx.config.server.directory.groups.clone(),
        )),
    };

    let service = AuthorizationService::new(
        Arc::clone(&ctx.config),
        Arc::clone(&ctx.verifier),
        directory,
        role_assumer().await?,
    );
    authz::serve(Arc::new(service)).await
}

#[cfg(feature = "sts")]
async fn role_assumer() -> Result<Arc<dyn RoleAssumer>> {
    Ok(Arc::new(authz::StsRoleAssumer::from_env().await))
}

#[cfg(not(feature = "sts"))]
async fn role_assumer() -> Result<Arc<dyn RoleAssumer>> {
    Err(credential_broker::Error::Config(
        "Built without the `sts` feature; no role assumption backend available".to_string(),
    ))
}
