use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use campus_auth::authz;
use campus_auth::config::{config_schema, load_config};
use campus_auth::guard::{GuardDecision, RouteRequirement};
use campus_auth::models::{LoginCredentials, Role};
use campus_auth::session::BootstrapOutcome;
use campus_auth::startup;
use campus_auth::state::AppState;
use campus_auth::utils::init_logging;

#[derive(Parser, Debug)]
#[command(name = "campus-auth", version)]
#[command(about = "Sign in to the campus dashboard backend and inspect the persisted session")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, short, default_value = "campus-auth.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the JSON schema of the configuration file
    Schema,
    /// Verify the persisted session and report the result
    Status,
    /// Sign in and persist the session
    Login { email: String, password: String },
    /// Sign out and clear the persisted session
    Logout,
    /// Show the signed-in user and their permissions
    Whoami,
    /// Evaluate the route guard for a path
    Check {
        path: String,
        /// Roles any of which grants access
        roles: Vec<String>,
        /// Permissions any of which grants access
        #[arg(long = "permission")]
        permissions: Vec<String>,
        /// Report "access denied" instead of redirecting
        #[arg(long)]
        deny: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Command::Schema = cli.command {
        println!("{}", config_schema());
        return ExitCode::SUCCESS;
    }

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_logging(&config.logging) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    let (app, outcome) = match startup::run(Arc::new(config)).await {
        Ok(started) => started,
        Err(e) => {
            eprintln!("Startup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Schema => ExitCode::SUCCESS,
        Command::Status => status(&app, &outcome),
        Command::Login { email, password } => login(&app, email, password).await,
        Command::Logout => {
            app.session.logout().await;
            println!("Signed out.");
            ExitCode::SUCCESS
        }
        Command::Whoami => whoami(&app),
        Command::Check {
            path,
            roles,
            permissions,
            deny,
        } => {
            let mut requirement = RouteRequirement::new(path)
                .with_roles(roles.into_iter().map(Role::from))
                .with_permissions(permissions);
            if deny {
                requirement = requirement.deny_on_failure();
            }
            check(&app, &requirement)
        }
    }
}

fn status(app: &AppState, outcome: &BootstrapOutcome) -> ExitCode {
    match outcome {
        BootstrapOutcome::NoStoredSession => println!("No stored session."),
        BootstrapOutcome::Restored(user) => {
            println!("Session restored for {} <{}> ({})", user.full_name, user.email, user.role)
        }
        BootstrapOutcome::Rejected => println!("Stored session was rejected and has been cleared."),
        BootstrapOutcome::Unreachable => println!("Backend unreachable; stored session kept."),
        BootstrapOutcome::Superseded => println!("Session changed during verification."),
    }
    if let Some(error) = app.session.snapshot().error() {
        eprintln!("{}", error);
    }
    ExitCode::SUCCESS
}

async fn login(app: &AppState, email: String, password: String) -> ExitCode {
    let credentials = LoginCredentials::new(email, password);
    match app.session.login(&credentials).await {
        Ok(user) => {
            println!("Signed in as {} ({})", user.full_name, user.role);
            println!("Continue to {}", app.guard.post_login_target(None, Some(&user.role)));
            ExitCode::SUCCESS
        }
        Err(e) => {
            let snapshot = app.session.snapshot();
            eprintln!("{}", snapshot.error().unwrap_or("Login failed."));
            if e.is_unverified_email() {
                eprintln!("Verify your email address before signing in.");
            }
            ExitCode::FAILURE
        }
    }
}

fn whoami(app: &AppState) -> ExitCode {
    let snapshot = app.session.snapshot();
    let Some(user) = snapshot.user() else {
        println!("Not signed in.");
        return ExitCode::FAILURE;
    };
    println!("{} <{}>", user.full_name, user.email);
    println!("role: {}", user.role);
    if user.has_default_image(app.session.avatar()) {
        println!("avatar: default");
    } else if let Some(url) = &user.image_url {
        println!("avatar: {}", url);
    }
    println!("permissions: {}", authz::permissions_for(&user.role).join(", "));
    ExitCode::SUCCESS
}

fn check(app: &AppState, requirement: &RouteRequirement) -> ExitCode {
    match app.authorize(requirement) {
        GuardDecision::Render => {
            println!("render {}", requirement.path);
            ExitCode::SUCCESS
        }
        GuardDecision::Loading => {
            println!("loading");
            ExitCode::FAILURE
        }
        GuardDecision::RedirectToLogin { login_path, from } => {
            println!("redirect {} (from {})", login_path, from);
            ExitCode::FAILURE
        }
        GuardDecision::Redirect { to } => {
            println!("redirect {}", to);
            ExitCode::FAILURE
        }
        GuardDecision::AccessDenied => {
            println!("access denied");
            ExitCode::FAILURE
        }
    }
}
