use chatsync::chatcore::reaction::ReactionAction;
use chatsync::chatcore::types::{
    CallMediaType, Counterpart, GroupId, Message, Presence, PresenceUpdate, Receipt, ReceiptKind,
    Receiver, TypingIndicator, UserId,
};
use chatsync::chatcore::{Conversation, ConversationRow, GroupMember, MemberScope};
use chatsync::service::{GroupProfile, UserProfile};
use chatsync::types::events::{CallEvent, Event};
use chatsync::{ChatClient, InMemoryService, SyncConfig};
use chrono::{Duration as ChronoDuration, Local, Utc};
use clap::Parser;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

// Walks one session against the in-memory service: history, a sent message
// that gets delivered and read, reactions, typing, presence and a call.
//
// Usage:
//   cargo run                          # human-readable log
//   cargo run -- --json                # dump the final state as JSON
//   cargo run -- --page-size 5         # smaller history pages

#[derive(Parser)]
#[command(name = "chatsync")]
#[command(about = "Chat session reconciliation demo")]
struct Cli {
    /// Local user id.
    #[arg(short, long, default_value = "me")]
    user: String,

    /// Override the history page size.
    #[arg(short, long)]
    page_size: Option<usize>,

    #[arg(short, long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let cli = Cli::parse();
    let mut config = SyncConfig::from_env();
    if let Some(size) = cli.page_size {
        config.history_page_size = size.max(1);
    }

    let local = UserId::new(cli.user.as_str());
    let service = Arc::new(InMemoryService::new(local.clone()));
    seed(&service, &local);

    let client = ChatClient::new(local.clone(), service.clone(), config);
    let (tx, rx) = mpsc::channel(64);
    let pump = client.run_events(rx);

    client.load_conversations().await?;
    print_rows(&client.conversation_rows());

    let climbers = GroupId::new("climbers");
    let members = client.groups().load_members(&climbers).await?;
    info!(
        "{} has {} members, admin: {}",
        climbers,
        members.len(),
        client.groups().is_admin(&climbers)
    );

    let alice = Counterpart::user("alice");
    let chat = client.open_conversation(alice.clone()).await;
    while chat.has_more() {
        if let Some(outcome) = chat.load_older().await? {
            info!("History page: {outcome:?}");
        }
    }
    info!("Loaded {} messages with {alice}", chat.messages().len());

    let sent = chat.send_text("On my way").await?;
    info!("Sent {} ({:?})", sent.id, chat.status(&sent.id));
    for kind in [ReceiptKind::Delivered, ReceiptKind::Read] {
        tx.send(Event::Receipt(Receipt::new(
            sent.id.clone(),
            kind,
            "alice",
            Utc::now(),
        )))
        .await?;
        tokio::time::sleep(Duration::from_millis(20)).await;
        info!("{} is now {:?}", sent.id, chat.status(&sent.id));
    }

    chat.react(&sent.id, "👍", ReactionAction::Add).await?;
    chat.react(&sent.id, "❤️", ReactionAction::Add).await?;
    info!("Reactions on {}: {:?}", sent.id, chat.reactions(&sent.id));

    tx.send(Event::TypingStarted(TypingIndicator {
        sender: UserId::new("alice"),
        sender_name: "Alice Smith".to_string(),
        receiver: Receiver::user(local.as_str()),
    }))
    .await?;
    tx.send(Event::Presence(PresenceUpdate {
        user: UserId::new("alice"),
        presence: Presence::Offline,
        last_active_at: Some(Utc::now() - ChronoDuration::minutes(5)),
    }))
    .await?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    info!("Typing: {:?}", chat.typing_label());
    info!(
        "Alice: {}",
        client.presence_label(&UserId::new("alice"), &Local::now())
    );

    let call = chat.start_call(CallMediaType::Video).await?;
    info!("Ringing {} in {}", call.receiver.id, call.session_id);
    tx.send(Event::Call(CallEvent::OutgoingAccepted {
        session_id: call.session_id.clone(),
    }))
    .await?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    info!("Call permits {:?}", client.permitted_call_actions().await);
    if let Err(e) = client.calls().end().await {
        warn!("Could not end call: {e}");
    }

    print_rows(&client.conversation_rows());
    if cli.json {
        let dump = serde_json::json!({
            "conversations": client.conversation_rows(),
            "messages": chat.messages(),
        });
        println!("{}", serde_json::to_string_pretty(&dump)?);
    }

    drop(tx);
    pump.await?;
    Ok(())
}

fn seed(service: &InMemoryService, local: &UserId) {
    service.insert_user(UserProfile {
        id: UserId::new("alice"),
        name: "Alice Smith".to_string(),
        presence: Presence::Online,
        last_active_at: None,
    });
    service.insert_group(GroupProfile {
        id: GroupId::new("climbers"),
        name: "Climbers".to_string(),
        member_count: 4,
    });
    service.insert_member("climbers", GroupMember::new(local.clone(), "Me", MemberScope::Admin));
    for (id, name) in [("alice", "Alice Smith"), ("bob", "Bob Jones"), ("carol", "Carol White")] {
        service.insert_member("climbers", GroupMember::participant(id, name));
    }

    let start = Utc::now() - ChronoDuration::hours(3);
    let mut last = None;
    for i in 0..12 {
        let (from, to) = if i % 3 == 0 {
            (local.as_str(), "alice")
        } else {
            ("alice", local.as_str())
        };
        let message = Message::text(
            format!("h{i}"),
            from,
            Receiver::user(to),
            format!("message {i}"),
            start + ChronoDuration::minutes(i * 10),
        );
        service.insert_message(message.clone());
        last = Some(message);
    }

    let mut with_alice = Conversation::new("c-alice", Counterpart::user("alice"), "Alice Smith");
    if let Some(message) = last {
        with_alice = with_alice.with_last_message(message).with_unread(8);
    }
    service.insert_conversation(with_alice);
    service.insert_conversation(Conversation::new(
        "c-climbers",
        Counterpart::group("climbers"),
        "Climbers",
    ));
}

fn print_rows(rows: &[ConversationRow]) {
    let now = Local::now();
    for row in rows {
        info!(
            "{:<14} {:<8} {:>3} {}",
            row.name,
            row.time_label(&now).unwrap_or_default(),
            row.unread_count,
            row.preview,
        );
    }
}
