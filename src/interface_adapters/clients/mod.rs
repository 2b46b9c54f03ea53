// Outbound clients to sibling services. The realtime core never calls
// these from inside a lock; session verification happens before upgrade,
// well outside `game.lock`/`registry` entirely.

pub mod auth;
