// Integration tests for the dialogue bridge and translation client
//
// Both run against the axum mock backend on an ephemeral port.

mod common;

use anyhow::Result;
use common::{test_config, MockBackend};
use std::sync::atomic::Ordering;
use voicecall::dialogue::{DialogueBridge, Speaker};
use voicecall::error::CallError;
use voicecall::translate::{Language, Translator};

async fn registered_bridge(backend: &MockBackend) -> DialogueBridge {
    let bridge = DialogueBridge::new(&test_config(backend).dialogue, "Hello");
    assert!(bridge.register().await);
    bridge
}

#[tokio::test]
async fn test_register_issues_key() -> Result<()> {
    let backend = MockBackend::start().await?;
    let bridge = DialogueBridge::new(&test_config(&backend).dialogue, "Hello");
    assert!(!bridge.is_ready());

    assert!(bridge.register().await);
    assert!(bridge.is_ready());

    Ok(())
}

#[tokio::test]
async fn test_register_failure_makes_chat_a_no_op() -> Result<()> {
    let backend = MockBackend::start().await?;
    backend.state.register_fails.store(true, Ordering::SeqCst);

    let bridge = DialogueBridge::new(&test_config(&backend).dialogue, "Hello");
    assert!(!bridge.register().await);
    assert!(!bridge.is_ready());

    let result = bridge.chat("anyone there?").await;
    assert!(matches!(result, Err(CallError::NotRegistered)));
    assert!(backend.chats().is_empty());
    assert!(bridge.transcript().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_unreachable_backend_fails_registration() -> Result<()> {
    let backend = MockBackend::start().await?;
    let mut cfg = test_config(&backend);
    cfg.dialogue.url = "http://127.0.0.1:1".to_string();

    let bridge = DialogueBridge::new(&cfg.dialogue, "Hello");
    assert!(!bridge.register().await);

    Ok(())
}

#[tokio::test]
async fn test_chat_sends_key_and_records_turns() -> Result<()> {
    let backend = MockBackend::start().await?;
    backend.reply(1, "How can I help?", None);
    let bridge = registered_bridge(&backend).await;

    let greeting = bridge.start();
    assert_eq!(greeting.speaker, Speaker::System);
    assert_eq!(greeting.content, "Hello");

    let reply = bridge.chat("my card is blocked").await?;
    assert_eq!(reply.content, "How can I help?");
    assert!(!reply.dial_pad_next);
    assert!(!reply.end_call);

    assert_eq!(backend.chats(), vec!["my card is blocked".to_string()]);
    assert_eq!(backend.state.bad_keys.load(Ordering::SeqCst), 0);

    let transcript = bridge.transcript();
    assert_eq!(transcript.len(), 3);
    assert_eq!(transcript[1].speaker, Speaker::User);
    assert_eq!(transcript[1].content, "my card is blocked");
    assert_eq!(transcript[2].content, "How can I help?");

    Ok(())
}

#[tokio::test]
async fn test_end_call_reply() -> Result<()> {
    let backend = MockBackend::start().await?;
    backend.reply(6, "Goodbye", None);
    let bridge = registered_bridge(&backend).await;

    let reply = bridge.chat("bye").await?;
    assert!(reply.end_call);
    assert!(!bridge.has_pending_input());

    Ok(())
}

#[tokio::test]
async fn test_dial_pad_reply_without_input_id_is_rejected() -> Result<()> {
    let backend = MockBackend::start().await?;
    backend.reply(5, "Enter your number", None);
    let bridge = registered_bridge(&backend).await;

    let result = bridge.chat("check my account").await;
    assert!(matches!(result, Err(CallError::MissingInputId)));
    assert!(!bridge.has_pending_input());

    Ok(())
}

#[tokio::test]
async fn test_supply_input_is_single_use() -> Result<()> {
    let backend = MockBackend::start().await?;
    backend.reply(5, "Enter your number", Some(7));
    backend.reply(1, "Thank you", None);
    let bridge = registered_bridge(&backend).await;

    let reply = bridge.chat("check my account").await?;
    assert!(reply.dial_pad_next);
    assert_eq!(reply.input_id, Some(7));
    assert!(bridge.has_pending_input());

    let reply = bridge.supply_input("1234567#7654321#").await?;
    assert_eq!(reply.content, "Thank you");
    assert!(!bridge.has_pending_input());

    let again = bridge.supply_input("1234567#7654321#").await;
    assert!(matches!(again, Err(CallError::NoPendingInput)));

    assert_eq!(backend.supplies(), vec![(7, "1234567#7654321#".to_string())]);

    Ok(())
}

#[tokio::test]
async fn test_supply_without_pending_slot() -> Result<()> {
    let backend = MockBackend::start().await?;
    let bridge = registered_bridge(&backend).await;

    let result = bridge.supply_input("1234567#7654321#").await;
    assert!(matches!(result, Err(CallError::NoPendingInput)));
    assert!(backend.supplies().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_translate() -> Result<()> {
    let backend = MockBackend::start().await?;
    let translator = Translator::new(&test_config(&backend).translation);

    let translated = translator.translate("good morning", Language::Malay).await?;
    assert_eq!(translated.as_deref(), Some("[ms] good morning"));

    Ok(())
}

#[tokio::test]
async fn test_translate_refuses_oversized_text() -> Result<()> {
    let backend = MockBackend::start().await?;
    let translator = Translator::new(&test_config(&backend).translation);

    let result = translator.translate(&"x".repeat(1200), Language::Tamil).await;
    assert!(matches!(result, Err(CallError::TextTooLong { len: 1200 })));

    Ok(())
}
