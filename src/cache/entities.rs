//! Entity tables kept warm by gateway events.
//!
//! [`EntityCache`] owns one [`Store`] per entity kind and wires itself
//! into a [`Dispatcher`] with `attach`. Create events insert, update
//! events merge over the cached object, delete events evict. The cache
//! is a plain consumer of dispatched events; the connection does not
//! know it exists.

use std::sync::Arc;

use crate::cache::store::Store;
use crate::gateway::dispatch::{Dispatcher, Event, ListenerHandle};
use crate::gateway::messages::EVENT_READY;
use crate::shared::snowflake::Snowflake;

#[derive(Clone, Default)]
pub struct EntityCache {
    users: Arc<Store>,
    guilds: Arc<Store>,
    channels: Arc<Store>,
    messages: Arc<Store>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn users(&self) -> &Store {
        &self.users
    }

    pub fn guilds(&self) -> &Store {
        &self.guilds
    }

    pub fn channels(&self) -> &Store {
        &self.channels
    }

    pub fn messages(&self) -> &Store {
        &self.messages
    }

    /// Registers the tracking listeners. The returned handles detach the
    /// cache again via [`Dispatcher::remove`].
    pub fn attach(&self, dispatcher: &Dispatcher) -> Vec<ListenerHandle> {
        let mut handles = vec![self.track_ready(dispatcher)];

        for (name, store) in [
            ("GUILD_CREATE", &self.guilds),
            ("CHANNEL_CREATE", &self.channels),
            ("MESSAGE_CREATE", &self.messages),
        ] {
            handles.push(track_insert(dispatcher, name, store));
        }
        for (name, store) in [
            ("USER_UPDATE", &self.users),
            ("GUILD_UPDATE", &self.guilds),
            ("CHANNEL_UPDATE", &self.channels),
            ("MESSAGE_UPDATE", &self.messages),
        ] {
            handles.push(track_merge(dispatcher, name, store));
        }
        for (name, store) in [
            ("GUILD_DELETE", &self.guilds),
            ("CHANNEL_DELETE", &self.channels),
            ("MESSAGE_DELETE", &self.messages),
        ] {
            handles.push(track_remove(dispatcher, name, store));
        }

        handles
    }

    /// READY carries the authenticated user inline rather than as its
    /// own event.
    fn track_ready(&self, dispatcher: &Dispatcher) -> ListenerHandle {
        let users = Arc::clone(&self.users);
        dispatcher.on_with_id(EVENT_READY, listener_id(EVENT_READY), move |event: Event| {
            let users = Arc::clone(&users);
            async move {
                if let Some(user) = event.payload.get("user") {
                    users.insert(user.clone());
                }
                Ok(())
            }
        })
    }
}

fn listener_id(name: &str) -> String {
    format!("cache:{}", name.to_ascii_lowercase())
}

fn track_insert(dispatcher: &Dispatcher, name: &str, store: &Arc<Store>) -> ListenerHandle {
    let store = Arc::clone(store);
    dispatcher.on_with_id(name, listener_id(name), move |event: Event| {
        let store = Arc::clone(&store);
        async move {
            if store.insert(event.payload).is_none() {
                tracing::debug!(event = %event.name, "Create payload without id ignored");
            }
            Ok(())
        }
    })
}

fn track_merge(dispatcher: &Dispatcher, name: &str, store: &Arc<Store>) -> ListenerHandle {
    let store = Arc::clone(store);
    dispatcher.on_with_id(name, listener_id(name), move |event: Event| {
        let store = Arc::clone(&store);
        async move {
            store.merge(event.payload);
            Ok(())
        }
    })
}

fn track_remove(dispatcher: &Dispatcher, name: &str, store: &Arc<Store>) -> ListenerHandle {
    let store = Arc::clone(store);
    dispatcher.on_with_id(name, listener_id(name), move |event: Event| {
        let store = Arc::clone(&store);
        async move {
            if let Some(id) = Snowflake::from_payload(&event.payload) {
                store.remove(id);
            }
            Ok(())
        }
    })
}
