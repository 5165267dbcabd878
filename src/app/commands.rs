//! Subcommand execution

use super::cli::args::Command;
use super::output::{format_message, format_outcome};
use crate::core::shutdown::ShutdownCoordinator;
use crate::queue::{
    handler_fn, GroupSelector, HandlerError, Message, ProducerMessage, QueueClient, QueueResult,
};
use crate::store::StartPosition;
use std::time::Duration;

/// Run one command against a connected client
pub async fn run(
    client: &QueueClient,
    command: Command,
    color: bool,
    shutdown: ShutdownCoordinator,
) -> QueueResult<()> {
    match command {
        Command::Send {
            queue,
            payload,
            key,
            delay_ms,
        } => {
            let mut message = ProducerMessage::new(payload);
            if let Some(key) = key {
                message = message.with_key(key);
            }
            if let Some(ms) = delay_ms {
                message = message.with_delay(Duration::from_millis(ms));
            }
            let outcome = client.send_message(&queue, message).await?;
            println!("{}", format_outcome(&queue, &outcome, color));
        }

        Command::Tail {
            queue,
            group,
            batch,
        } => {
            let handler = handler_fn(move |messages: Vec<Message>| async move {
                for message in &messages {
                    println!("{}", format_message(message, color));
                }
                Ok::<(), HandlerError>(())
            });
            let group = GroupSelector::from(group);
            let subscription = if batch {
                client.batch_subscribe(&queue, group, handler).await?
            } else {
                client.subscribe(&queue, group, handler).await?
            };

            log::info!(
                "Tailing '{}' as group '{}'; press Ctrl-C to stop",
                subscription.queue(),
                subscription.group()
            );
            shutdown.subscribe().wait().await;
            subscription.stop().await;
        }

        Command::Expired { queue, delete } => {
            let expired = client.get_expired_messages(&queue, delete).await?;
            for message in &expired {
                println!("{}", format_message(message, color));
            }
            let verb = if delete { "deleted" } else { "found" };
            println!("{} {} expired messages in '{}'", verb, expired.len(), queue);
        }

        Command::ResetOffset {
            queue,
            group,
            partition,
            to,
        } => {
            let position = to.parse::<StartPosition>().map_err(|reason| {
                crate::queue::ConfigError::InvalidValue {
                    field: "to".to_string(),
                    reason,
                }
            })?;
            let group = GroupSelector::from(group);
            match partition {
                Some(partition) => {
                    client
                        .reset_consumer_offset_by_partition(&queue, group, partition, position)
                        .await?
                }
                None => client.reset_consumer_offset(&queue, group, position).await?,
            }
            println!("offsets of '{}' reset", queue);
        }

        Command::DelGroup { queue, group } => {
            client.del_group(&queue, &group).await?;
            println!("group '{}' deleted from '{}'", group, queue);
        }

        Command::DelQueue { queue } => {
            let deleted = client.del_queue(&queue).await?;
            println!("queue '{}' deleted ({} keys)", queue, deleted);
        }
    }
    Ok(())
}
