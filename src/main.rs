use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::info;

use ng112::app::{Agent, AgentConfig, Conversation, ConversationOptions, MessageDraft};
use ng112::core::{ConversationState, Location, Origin, Role, VCard};
use ng112::logging::{init_logging, set_level};
use ng112::namespace::NamespaceKind;
use ng112::sip::{LoopbackNetwork, SipAdapter};

const DEMO_LOCATION: &str = r#"<presence xmlns="urn:ietf:params:xml:ns:pidf" entity="pres:caller@dec112.at"><tuple id="t1"><status><geopriv xmlns="urn:ietf:params:xml:ns:pidf:geopriv10"><location-info><Point xmlns="http://www.opengis.net/gml" srsName="urn:ogc:def:crs:EPSG::4326"><pos>48.2082 16.3738</pos></Point></location-info></geopriv></status></tuple></presence>"#;
const DEMO_VCARD: &str = "<vcard><fn><text>Jane Doe</text></fn><tel><uri>tel:+436601234567</uri></tel></vcard>";

/// Run a CLIENT and a PSAP agent against each other over an in-memory SIP network.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Protocol namespace: etsi or dec112
    #[arg(short, long, default_value = "dec112")]
    namespace: NamespaceKind,

    /// Emergency service URI the client calls
    #[arg(short, long, default_value = "sip:144@dec112.eu")]
    target: String,

    /// Messages the client sends after the conversation started (repeatable)
    #[arg(short, long)]
    message: Vec<String>,

    /// Mark the conversation as a test call
    #[arg(long)]
    test: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log filter switched to once the conversation is started, e.g. "debug"
    #[arg(long)]
    chat_log_level: Option<String>,
}

fn agent(network: &LoopbackNetwork, config: AgentConfig) -> anyhow::Result<Agent> {
    let network = network.clone();
    let factory = move |config: &AgentConfig| -> Arc<dyn SipAdapter> {
        network.adapter(&config.endpoint, config.display_name.as_deref())
    };
    Agent::new(config, &factory).context("Failed to create agent")
}

async fn wait_for_state(conversation: &Conversation, state: ConversationState) -> anyhow::Result<()> {
    for _ in 0..100 {
        if conversation.state().value == state {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    bail!(
        "conversation {} did not reach {state}, still {}",
        conversation.id(),
        conversation.state().value
    )
}

fn print_log(title: &str, conversation: &Conversation) {
    println!("── {title} ({}, state {}) ──", conversation.id(), conversation.state().value);
    for message in conversation.messages() {
        let direction = match message.origin() {
            Origin::Local => "->",
            Origin::Remote => "<-",
            Origin::System => "--",
        };
        println!(
            "{direction} #{:<3} {:<10} {:?} {}{}",
            message.id().to_string(),
            message.message_type().to_string(),
            message.state(),
            message.text().unwrap_or(""),
            if message.location().is_some() { " [location]" } else { "" },
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let network = LoopbackNetwork::new();

    let mut psap_config = AgentConfig::new(args.target.clone(), Role::Psap, args.namespace);
    psap_config.display_name = Some("PSAP".into());
    let psap = agent(&network, psap_config)?;

    let mut client_config = AgentConfig::new("sip:caller@dec112.at", Role::Client, args.namespace);
    client_config.display_name = Some("Jane Doe".into());
    client_config.client_info.device_id = Some("demo-device".into());
    client_config.client_info.language = Some("en".into());
    let client = agent(&network, client_config)?;
    client.store().set_location(Some(Location::from_xml(DEMO_LOCATION)));
    client.store().set_vcard(Some(VCard::from_xml(DEMO_VCARD)));

    // The PSAP answers the first message of every new conversation.
    psap.add_conversation_listener(|conversation| {
        let answering = conversation.clone();
        conversation.add_message_listener(move |message| {
            if message.origin() == Origin::Remote && message.message_type().is_started() && !answering.has_been_started() {
                if let Err(err) = answering.send_message(MessageDraft::text("PSAP here, what is your emergency?")) {
                    tracing::error!("[main] PSAP could not answer: {err}");
                }
            }
        });
    });

    let psap_listener = psap.listen();
    let client_listener = client.listen();

    let conversation = client.create_conversation(
        &args.target,
        ConversationOptions {
            is_test: args.test,
            id: None,
        },
    )?;
    let start = conversation.start(MessageDraft::text("Emergency, please help"))?;
    start.completion.wait().await?;

    wait_for_state(&conversation, ConversationState::Started).await?;
    info!("[main] Conversation {} started", conversation.id());
    if let Some(filter) = &args.chat_log_level {
        set_level(filter).context("Failed to switch log filter")?;
    }

    let messages = if args.message.is_empty() {
        vec!["There is a fire in the kitchen".to_string(), "Everybody is outside".to_string()]
    } else {
        args.message.clone()
    };
    for text in &messages {
        let sent = conversation.send_message(MessageDraft::text(text))?;
        sent.completion.wait().await?;
    }

    let stop = conversation.stop(MessageDraft::text("Thank you"))?;
    stop.completion.wait().await?;
    wait_for_state(&conversation, ConversationState::Stopped).await?;

    let psap_side = psap
        .conversation(conversation.id())
        .context("PSAP never saw the conversation")?;
    wait_for_state(&psap_side, ConversationState::Stopped).await?;

    print_log("client", &conversation);
    print_log("psap", &psap_side);

    client.shutdown();
    psap.shutdown();
    let _ = tokio::join!(client_listener, psap_listener);
    Ok(())
}
