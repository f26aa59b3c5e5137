use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use storefront_api::{
    auth::{AuthConfig, AuthService},
    config::{self, AppConfig},
    db::{self, DbPool},
    repositories::{SeaOrmUserRepository, UserRepository},
    services::orders::UserSummary,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.db)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::Users(command) => handle_users_command(&context, command, cli.json).await?,
        Commands::Token(args) => handle_token_command(&context, args, cli.json).await?,
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "storefront", about = "Storefront operator CLI", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    #[command(subcommand)]
    Users(UsersCommands),
    /// Mint a bearer token for an existing user (development only)
    Token(TokenArgs),
}

#[derive(Subcommand)]
enum UsersCommands {
    Create(CreateUserArgs),
    List,
}

#[derive(Args)]
struct CreateUserArgs {
    #[arg(long, help = "Display name")]
    name: String,
    #[arg(long, help = "Unique email address")]
    email: String,
    #[arg(long, action = ArgAction::SetTrue, help = "Grant admin access")]
    admin: bool,
}

#[derive(Args)]
struct TokenArgs {
    #[arg(long, help = "Email of the user to mint a token for")]
    email: String,
}

#[derive(Serialize)]
struct UserRow {
    #[serde(flatten)]
    summary: UserSummary,
    is_admin: bool,
}

#[derive(Serialize)]
struct TokenOutput {
    user: UserSummary,
    token: String,
    expires_in: u64,
}

async fn handle_users_command(context: &CliContext, command: UsersCommands, json: bool) -> Result<()> {
    match command {
        UsersCommands::Create(args) => {
            if !args.email.contains('@') {
                return Err(anyhow!("invalid email address: {}", args.email));
            }
            let user = context
                .users
                .create(&args.name, &args.email, args.admin)
                .await
                .context("failed to create user")?;
            let row = UserRow {
                is_admin: user.is_admin,
                summary: UserSummary::from(user),
            };
            if json {
                print_json(&row)?;
            } else {
                println!("Created user {} <{}> (id {})", row.summary.name, row.summary.email, row.summary.id);
            }
        }
        UsersCommands::List => {
            let rows: Vec<UserRow> = context
                .users
                .list()
                .await
                .context("failed to list users")?
                .into_iter()
                .map(|user| UserRow {
                    is_admin: user.is_admin,
                    summary: UserSummary::from(user),
                })
                .collect();
            if json {
                print_json(&rows)?;
            } else if rows.is_empty() {
                println!("No users");
            } else {
                for row in &rows {
                    println!(
                        "- {} <{}> • id {}{}",
                        row.summary.name,
                        row.summary.email,
                        row.summary.id,
                        if row.is_admin { " • admin" } else { "" }
                    );
                }
            }
        }
    }
    Ok(())
}

async fn handle_token_command(context: &CliContext, args: TokenArgs, json: bool) -> Result<()> {
    if context.config.is_production() {
        return Err(anyhow!("refusing to mint tokens in production"));
    }

    let user = context
        .users
        .find_by_email(&args.email)
        .await
        .context("failed to look up user")?
        .ok_or_else(|| anyhow!("no user with email {}", args.email))?;

    let token = context
        .auth_service
        .issue_token(&user)
        .context("failed to sign token")?;

    let output = TokenOutput {
        user: UserSummary::from(user),
        token,
        expires_in: context.config.jwt_expiration,
    };
    if json {
        print_json(&output)?;
    } else {
        println!("{}", output.token);
    }
    Ok(())
}

struct CliContext {
    config: AppConfig,
    db: Arc<DbPool>,
    users: Arc<dyn UserRepository>,
    auth_service: Arc<AuthService>,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        let db = Arc::new(db_pool);

        let users: Arc<dyn UserRepository> = Arc::new(SeaOrmUserRepository::new(db.clone()));
        let auth_service = Arc::new(AuthService::new(AuthConfig::from(&config), users.clone()));

        Ok(Self {
            config,
            db,
            users,
            auth_service,
        })
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
