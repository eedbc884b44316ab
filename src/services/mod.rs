/// Authentication and pool role resolution.
pub mod access_service;
/// Manager operations across many squares.
pub mod bulk_service;
/// Bearer credential validation for external and guest tokens.
pub mod credentials;
/// OpenAPI documentation generation.
pub mod documentation;
/// Grid listing, saving, drawing and deletion.
pub mod grid_service;
/// Health check service.
pub mod health_service;
/// Lookup of user emails in the external identity provider.
pub mod identity_directory;
/// Cached signing keys of the external identity provider.
pub mod key_locker;
/// Database notification to broker bridge.
pub mod notify_bridge;
/// Pool creation, manager actions, invites and joining.
pub mod pool_service;
/// Square listing, detail and commands.
pub mod square_service;
/// Sports leagues and cached events.
pub mod sports_service;
/// Server-Sent Events stream for pool changes.
pub mod sse_service;
/// Signing of guest and invite tokens.
pub mod token_signer;
/// Guest account minting.
pub mod user_service;
