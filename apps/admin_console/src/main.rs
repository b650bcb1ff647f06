use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use client_core::{
    settings::normalize_database_url, load_settings, ConnectionManager, ConversationStore,
    Credential, RestGateway, StoreError, StoreHandle, WsConnector,
};
use shared::domain::BranchRef;
use storage::Storage;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

mod commands;
mod render;

use commands::{ConsoleCommand, HELP};

/// Terminal front end for the branch chat dashboard.
#[derive(Parser, Debug)]
struct Args {
    /// Bearer token issued by the admin login.
    #[arg(long)]
    token: String,
    #[arg(long)]
    api_base_url: Option<String>,
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let mut settings = load_settings()?;
    if let Some(api_base_url) = args.api_base_url {
        settings.api_base_url = api_base_url;
    }
    if let Some(database_url) = args.database_url {
        settings.database_url = normalize_database_url(&database_url);
    }
    info!(api = %settings.api_base_url, "console: starting");

    let credential = Credential::new(args.token);
    let storage = Storage::new(&settings.database_url).await?;
    let gateway = Arc::new(RestGateway::new(
        &settings.api_base_url,
        credential.clone(),
        settings.request_timeout,
    )?);
    let manager = Arc::new(ConnectionManager::new(
        settings.connection()?,
        Arc::new(WsConnector),
    ));
    let store = ConversationStore::mount(
        manager.clone(),
        gateway.clone(),
        Arc::new(storage),
        settings.store(),
    )
    .await;

    // The driver keeps retrying in the background after a failed first attempt.
    if let Err(err) = manager.connect(credential).await {
        warn!("console: push channel not ready: {err}");
    }
    let follower = tokio::spawn(render::follow(store.watch()));
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match commands::parse(&line) {
            Ok(Some(ConsoleCommand::Quit)) => break,
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };
        if let Err(err) = execute(command, &store, &gateway).await {
            println!("error: {err:#}");
        }
    }

    follower.abort();
    store.unmount().await;
    manager.disconnect().await;
    info!("console: bye");
    Ok(())
}

async fn execute(command: ConsoleCommand, store: &StoreHandle, gateway: &RestGateway) -> Result<()> {
    match command {
        ConsoleCommand::Branches => {
            for branch in gateway.branch_overview().await? {
                println!("{}", render::branch_line(&branch));
            }
        }
        ConsoleCommand::Branch { id, name } => store.select_branch(BranchRef { id, name }),
        ConsoleCommand::List => {
            for row in &store.snapshot().conversations {
                println!("{}", render::conversation_line(row));
            }
        }
        ConsoleCommand::Open(chat) => store.select_conversation(chat),
        ConsoleCommand::Leave => store.deselect(),
        ConsoleCommand::Close => store.close_conversation(None),
        ConsoleCommand::Assign(admin) => {
            let chat = store
                .snapshot()
                .open
                .map(|open| open.id)
                .ok_or(StoreError::NoConversationOpen)?;
            gateway.assign_conversation(&chat, &admin).await?;
            println!("assigned {chat} to {admin}");
        }
        ConsoleCommand::Delete(id) => store.delete_message(id).await?,
        ConsoleCommand::Resend(id) => store.resend(id).await?,
        ConsoleCommand::Typing => store.notify_typing(),
        ConsoleCommand::Refresh => store.refresh_conversations(),
        ConsoleCommand::Stats => {
            let branch = store.snapshot().branch.map(|branch| branch.id);
            let stats = gateway.chat_stats(branch.as_ref()).await?;
            println!(
                "total: {}  active: {}  closed: {}  unread: {}",
                stats.total_chats, stats.active_chats, stats.closed_chats, stats.total_unread
            );
        }
        ConsoleCommand::Back => store.back_to_branches(),
        ConsoleCommand::Help => println!("{HELP}"),
        ConsoleCommand::Send(text) => {
            store.send_message(text).await?;
        }
        ConsoleCommand::Quit => {}
    }
    Ok(())
}
