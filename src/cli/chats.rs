use anyhow::Result;
use console::style;

use crate::core::api::ChatBackend;
use crate::core::config::ClientConfig;
use crate::core::terminal::{GuideSection, print_info, print_queue, print_status};

use super::{connect, connect_backend};

pub async fn list_chats(config: &ClientConfig) -> Result<()> {
    let coordinator = connect(config)?;
    let conversations = coordinator.load_conversations().await?;
    if conversations.is_empty() {
        print_info("No conversations yet. Start one with 'convoy run --new -p <text>'.");
        return Ok(());
    }
    let mut section = GuideSection::new("Conversations");
    for conversation in &conversations {
        section = section.status(
            &conversation.title,
            &format!(
                "{} {}",
                conversation.id,
                style(&conversation.updated_at).dim()
            ),
        );
    }
    section.print();
    println!();
    Ok(())
}

pub async fn show_queue(config: &ClientConfig) -> Result<()> {
    let backend = connect_backend(config)?;
    let snapshot = backend.queue_status().await?;
    print_status(
        "Processing",
        snapshot.processing_job_id.as_deref().unwrap_or("nothing"),
    );
    print_queue(snapshot.pending_count, None);
    for entry in &snapshot.queue {
        println!("  {:>3}. {}", entry.position, entry.id);
    }
    Ok(())
}

pub async fn list_models(config: &ClientConfig) -> Result<()> {
    let coordinator = connect(config)?;
    let models = coordinator.refresh_models().await?;
    if models.is_empty() {
        print_info("The backend reports no models.");
        return Ok(());
    }
    let mut section = GuideSection::new("Models");
    for model in &models {
        section = section.command(&model.id, &model.name);
    }
    section.print();
    println!();
    Ok(())
}
