//! REST route definitions.
//!
//! A [`Route`] couples the concrete request path with the normalized
//! template the rate limiter keys on. `/channels/1/messages` and
//! `/channels/2/messages` share a template; whether they also share a
//! limit bucket is decided by the server's bucket header at runtime.

use std::fmt;

use crate::shared::snowflake::Snowflake;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    method: Method,
    path: String,
    template: &'static str,
}

impl Route {
    /// Escape hatch for endpoints without a named constructor.
    pub fn raw(method: Method, template: &'static str, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            template,
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Concrete path relative to the API base, ids filled in.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn template(&self) -> &'static str {
        self.template
    }

    /// Rate-limit lookup key: method plus template.
    pub fn key(&self) -> String {
        format!("{} {}", self.method, self.template)
    }

    pub fn get_current_user() -> Self {
        Self::raw(Method::Get, "/users/@me", "/users/@me")
    }

    pub fn update_current_user() -> Self {
        Self::raw(Method::Patch, "/users/@me", "/users/@me")
    }

    pub fn get_current_user_guilds() -> Self {
        Self::raw(Method::Get, "/users/@me/guilds", "/users/@me/guilds")
    }

    pub fn get_user(user_id: Snowflake) -> Self {
        Self::raw(
            Method::Get,
            "/users/{user_id}",
            format!("/users/{user_id}"),
        )
    }

    pub fn create_guild() -> Self {
        Self::raw(Method::Post, "/guilds", "/guilds")
    }

    pub fn get_guild(guild_id: Snowflake) -> Self {
        Self::raw(
            Method::Get,
            "/guilds/{guild_id}",
            format!("/guilds/{guild_id}"),
        )
    }

    pub fn update_guild(guild_id: Snowflake) -> Self {
        Self::raw(
            Method::Patch,
            "/guilds/{guild_id}",
            format!("/guilds/{guild_id}"),
        )
    }

    pub fn delete_guild(guild_id: Snowflake) -> Self {
        Self::raw(
            Method::Delete,
            "/guilds/{guild_id}",
            format!("/guilds/{guild_id}"),
        )
    }

    pub fn get_guild_channels(guild_id: Snowflake) -> Self {
        Self::raw(
            Method::Get,
            "/guilds/{guild_id}/channels",
            format!("/guilds/{guild_id}/channels"),
        )
    }

    pub fn create_channel(guild_id: Snowflake) -> Self {
        Self::raw(
            Method::Post,
            "/guilds/{guild_id}/channels",
            format!("/guilds/{guild_id}/channels"),
        )
    }

    pub fn get_guild_members(guild_id: Snowflake) -> Self {
        Self::raw(
            Method::Get,
            "/guilds/{guild_id}/members",
            format!("/guilds/{guild_id}/members"),
        )
    }

    pub fn get_channel(channel_id: Snowflake) -> Self {
        Self::raw(
            Method::Get,
            "/channels/{channel_id}",
            format!("/channels/{channel_id}"),
        )
    }

    pub fn update_channel(channel_id: Snowflake) -> Self {
        Self::raw(
            Method::Patch,
            "/channels/{channel_id}",
            format!("/channels/{channel_id}"),
        )
    }

    pub fn delete_channel(channel_id: Snowflake) -> Self {
        Self::raw(
            Method::Delete,
            "/channels/{channel_id}",
            format!("/channels/{channel_id}"),
        )
    }

    pub fn get_messages(channel_id: Snowflake) -> Self {
        Self::raw(
            Method::Get,
            "/channels/{channel_id}/messages",
            format!("/channels/{channel_id}/messages"),
        )
    }

    pub fn create_message(channel_id: Snowflake) -> Self {
        Self::raw(
            Method::Post,
            "/channels/{channel_id}/messages",
            format!("/channels/{channel_id}/messages"),
        )
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}
