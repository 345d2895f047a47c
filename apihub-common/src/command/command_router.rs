use std::{
    any::{Any, TypeId},
    collections::{HashMap, HashSet},
    sync::Arc,
};

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use crate::error::Error;

#[derive(Clone)]
/// Command router
/// ---
/// It handles dispatching of commands to their appropriate handlers,
/// by abstracting the tedious task of creating communication channels
/// for services and keeping track of passing senders around.
/// Every command type has exactly one handler, keyed by its `TypeId`.
pub struct CommandRouter {
    /// Stores `Box<dyn Any + Send + Sync>` which are
    /// downcast to specific `mpsc::Sender<CommandType>`
    senders: Arc<Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>>,

    /// Stores `Box<dyn Any + Send + Sync>` which are
    /// downcast to specific `mpsc::Receiver<CommandType>`
    receivers: Arc<Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>>,

    /// Keys of receivers already handed out by `subscribe`.
    subscribed_receivers: Arc<Mutex<HashSet<TypeId>>>,

    channel_buf: usize,
}

impl CommandRouter {
    /// Creates a new `CommandRouter`.
    /// The channel buffer defaults to *16* commands per handler.
    pub fn new(channel_buf: Option<usize>) -> Self {
        Self {
            senders: Arc::new(Mutex::new(HashMap::new())),
            receivers: Arc::new(Mutex::new(HashMap::new())),
            subscribed_receivers: Arc::new(Mutex::new(HashSet::new())),
            channel_buf: channel_buf.unwrap_or(16),
        }
    }

    /// Registers the handler channel for commands of type `C`.
    /// `C` is typically an enum like `SupervisorCommand`.
    /// The receiving end is picked up later with `subscribe`.
    pub async fn register_handler<C: Any + Send + 'static>(&self) -> Result<(), Error> {
        let key = TypeId::of::<C>();
        let (tx, rx) = mpsc::channel::<C>(self.channel_buf);

        let mut senders_map = self.senders.lock().await;
        let mut receivers_map = self.receivers.lock().await;

        if senders_map.contains_key(&key) || receivers_map.contains_key(&key) {
            let error_msg = format!(
                "Handler for command type {} already registered.",
                std::any::type_name::<C>()
            );
            warn!("CommandRouter: {}", error_msg);
            return Err(Error::Internal(error_msg));
        }

        senders_map.insert(key, Box::new(tx));
        receivers_map.insert(key, Box::new(rx));

        Ok(())
    }

    /// Removes the handler for commands of type `C`.
    pub async fn deregister_handler<C: Any + Send + 'static>(&self) {
        let key = TypeId::of::<C>();

        if self.senders.lock().await.remove(&key).is_some() {
            debug!(
                "CommandRouter: deregistered sender for {}",
                std::any::type_name::<C>()
            );
        }
        self.receivers.lock().await.remove(&key);
        self.subscribed_receivers.lock().await.remove(&key);
    }

    /// Dispatches a command of type `C` to its registered handler.
    pub async fn dispatch<C: Any + Send + 'static>(&self, command: C) -> Result<(), Error> {
        let type_name = std::any::type_name::<C>();

        let sender_for_dispatch = {
            let senders_map = self.senders.lock().await;
            senders_map
                .get(&TypeId::of::<C>())
                .and_then(|boxed_sender| boxed_sender.downcast_ref::<mpsc::Sender<C>>())
                .cloned()
        };

        match sender_for_dispatch {
            Some(sender) => sender.send(command).await.map_err(|e| {
                Error::ChannelComm(format!(
                    "CommandRouter: Failed to send command to {}: {}",
                    type_name, e
                ))
            }),
            None => Err(Error::ChannelComm(format!(
                "CommandRouter: No handler registered for command type {}",
                type_name
            ))),
        }
    }

    /// Takes the receiver for commands of type `C`.
    ///
    /// **Warning**: `mpsc::Receiver` channels are not `Clone`,
    /// the receiver is removed from the router and can only
    /// be subscribed to once.
    pub async fn subscribe<C: Any + Send + 'static>(&self) -> Result<mpsc::Receiver<C>, Error> {
        let key = TypeId::of::<C>();
        let type_name = std::any::type_name::<C>();

        let mut subscribed_receivers = self.subscribed_receivers.lock().await;
        if subscribed_receivers.contains(&key) {
            let error_msg = format!(
                "CommandRouter: Already subscribed to command type {}",
                type_name
            );
            warn!("{}", error_msg);
            return Err(Error::Internal(error_msg));
        }

        let mut receivers_map = self.receivers.lock().await;

        match receivers_map.remove(&key) {
            Some(boxed_receiver) => match boxed_receiver.downcast::<mpsc::Receiver<C>>() {
                Ok(concrete_boxed_recv) => {
                    subscribed_receivers.insert(key);
                    Ok(*concrete_boxed_recv)
                }
                Err(_orig_boxed_recv) => Err(Error::Internal(format!(
                    "CommandRouter: Type mismatch for stored receiver for command type {}",
                    type_name
                ))),
            },
            None => Err(Error::Internal(format!(
                "CommandRouter: No receiver registered for command type {}",
                type_name
            ))),
        }
    }
}
