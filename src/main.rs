use std::fs::File;
use std::sync::Arc;

use poise::{serenity_prelude as serenity, CreateReply};
use tracing::{error, info, info_span, level_filters::LevelFilter, warn};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

use commands::{
    config_commands::ConfigCommands, event_commands::EventCommands,
    score_commands::ScoreCommands, stats_commands::StatsCommands, team_commands::TeamCommands,
    CommandsContainer,
};
use config::BotConfig;
use database::{PgDatabase, StatsDatabase, Store};
use platform::{Platform, SerenityPlatform};
use tournament::{error::EngineError, Tournament};

use crate::log::discord_log_error;
use crate::utils::error::describe;

/// All the commands that the bot can run.
///
/// Additionally, it contains the `CommandsContainer` trait that groups all the commands together
/// as well as checks used by various commands.
mod commands;
/// Settings read from the environment at startup.
mod config;
/// Traits and types used for interacting with the database.
mod database;
/// Gateway events other than commands: reactions and team-channel messages.
mod event_handler;
/// Contains functions for logging.
mod log;
/// The outbound calls the tournament core makes to Discord.
mod platform;
/// Events, sections, teams and the embeds that show them.
mod tournament;

mod utils;

/// Stores data used by the bot.
///
/// Accessible by all bot commands through Context.
#[derive(Debug)]
pub struct Data<DB, P> {
    database: Arc<DB>,
    tournament: Arc<Tournament<DB, P>>,
}

impl<DB, P> Data<DB, P>
where
    DB: Store,
    P: Platform,
{
    /// Create a new data struct, wiring the tournament core to a store and a platform.
    fn new(database: DB, platform: P) -> Self {
        let database = Arc::new(database);
        Self {
            tournament: Arc::new(Tournament::new(Arc::clone(&database), platform)),
            database,
        }
    }
}

/// Convenience type for the bot's data with generics filled in.
pub type BotData = Data<PgDatabase, SerenityPlatform>;

/// The tournament core as wired in the running bot.
pub type BotTournament = Tournament<PgDatabase, SerenityPlatform>;

/// A thread-safe Error type used by the bot.
pub type BotError = anyhow::Error;

/// A context that gives the bot information about the action that invoked it.
///
/// It also includes other useful data that the bot uses such as the database.
/// You can access the data in commands by using ``ctx.data()``.
pub type BotContext<'a> = poise::Context<'a, BotData, BotError>;

#[tokio::main]
async fn main() {
    let config = match BotConfig::from_env() {
        Ok(config) => config,
        Err(e) => panic!("Error trying to load the configuration: {:#}", e),
    };

    if let Err(e) = setup_tracing(&config) {
        panic!("Error trying to setup tracing: {}", e);
    }

    if let Err(e) = run(config).await {
        panic!("Error trying to run the bot: {}", e);
    }
}

/// The main function that runs the bot.
async fn run(config: BotConfig) -> Result<(), BotError> {
    let setup_span = info_span!("bot_setup");
    let _guard = setup_span.enter();

    let pg_database = PgDatabase::connect(&config.database_url).await?;
    pg_database.migrate().await?;
    info!("Database migrations are up to date");

    let commands: Vec<_> = vec![
        ConfigCommands::get_all(),
        EventCommands::get_all(),
        TeamCommands::get_all(),
        ScoreCommands::get_all(),
        StatsCommands::get_all(),
    ]
    .into_iter()
    .flatten()
    .collect();
    info!("Loaded {} commands", commands.len());

    let intents =
        serenity::GatewayIntents::non_privileged() | serenity::GatewayIntents::MESSAGE_CONTENT;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands,
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some(config.prefix.clone()),
                ..Default::default()
            },
            on_error: |error| Box::pin(on_error(error)),
            pre_command: |ctx| {
                Box::pin(async move {
                    let Some(guild_id) = ctx.guild_id() else {
                        return;
                    };
                    if let Err(e) = ctx
                        .data()
                        .database
                        .log_command(&guild_id, &ctx.author().id, &ctx.command().qualified_name)
                        .await
                    {
                        warn!("Could not count the use of {}: {}", ctx.command().name, e);
                    }
                })
            },
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler::event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                Ok(Data::new(
                    pg_database,
                    SerenityPlatform::new(ctx.http.clone()),
                ))
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(&config.discord_token, intents)
        .framework(framework)
        .await?;

    client.start().await?;

    Ok(())
}

/// Tells the user what went wrong and posts real failures to the guild's log channel.
async fn on_error(error: poise::FrameworkError<'_, BotData, BotError>) {
    let (message, is_failure) = match &error {
        poise::FrameworkError::NotAnOwner { .. } => return,
        poise::FrameworkError::GuildOnly { .. } => return,
        poise::FrameworkError::DmOnly { .. } => return,
        poise::FrameworkError::NsfwOnly { .. } => return,
        poise::FrameworkError::UnknownCommand { .. } => return,
        poise::FrameworkError::CommandCheckFailed { error, .. } => match error {
            Some(error) => describe(error),
            None => return,
        },
        poise::FrameworkError::MissingUserPermissions { .. } => {
            (EngineError::PermissionDenied.to_string(), false)
        }
        poise::FrameworkError::ArgumentParse { error, .. } => (error.to_string(), false),
        poise::FrameworkError::Command { error, .. } => describe(error),
        poise::FrameworkError::EventHandler { error, event, .. } => {
            error!("Error handling {}: {:?}", event.snake_case_name(), error);
            return;
        }
        poise::FrameworkError::Setup { error, .. } => {
            error!("Error during setup: {:?}", error);
            return;
        }
        other => {
            error!("Unhandled framework error: {}", other);
            return;
        }
    };

    let Some(ctx) = error.ctx() else {
        error!("No context in this error: {}", error);
        return;
    };
    if is_failure {
        error!("Error in command {}: {}", ctx.command().qualified_name, error);
    }

    if let Err(e) = ctx
        .send(CreateReply::default().content(&message).ephemeral(true))
        .await
    {
        error!("Error sending error message to user: {}", e);
    }

    if !is_failure || ctx.guild_id().is_none() {
        return;
    }
    let user_field = format!("<@{}>", ctx.author().id);
    let cause = error.to_string();
    let fields = vec![
        ("Command", ctx.command().qualified_name.as_str()),
        ("Cause", cause.as_str()),
        ("User", user_field.as_str()),
    ];
    discord_log_error(ctx, "Command Failed", fields)
        .await
        .unwrap_or_else(|e| error!("Error sending error message to log channel: {:?}", e));
}

/// Sets up the tracing subscriber for the bot.
fn setup_tracing(config: &BotConfig) -> Result<(), BotError> {
    if cfg!(debug_assertions) {
        let filter = EnvFilter::from_default_env()
            .add_directive("none".parse()?)
            .add_directive("tournament_bot=info".parse()?);

        tracing_subscriber::fmt::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::NONE)
            .pretty()
            .init();

        return Ok(());
    }

    let log_file = File::create(&config.log_file)?;

    // Only errors are written in production
    tracing_subscriber::fmt::fmt()
        .with_span_events(FmtSpan::NONE)
        .with_max_level(LevelFilter::ERROR)
        .with_writer(log_file)
        .pretty()
        .init();

    Ok(())
}
