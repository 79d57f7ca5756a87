use crate::error::ResolveError;
use async_trait::async_trait;

/// Resolves free text (mention syntax, a name, or a raw id) to a channel or
/// role reference within one guild.
///
/// Implementations must raise `ResolveError::NotFound` for unresolvable
/// input, keeping it distinct from transport failure: the editor treats
/// "could not resolve" as a user-input problem and everything else as a
/// session abort.
#[async_trait]
pub trait RefResolver: Send + Sync {
    async fn resolve_channel(&self, guild_id: i64, text: &str) -> Result<String, ResolveError>;

    async fn resolve_role(&self, guild_id: i64, text: &str) -> Result<String, ResolveError>;
}
