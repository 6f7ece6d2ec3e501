mod server;

use psc_mailbox::Mailbox;

pub use server::{ProxyServer, Reply, ServerConfig, Termination, MAX_PAYLOAD, TEST_RESPONSE};
pub use spdm_protocol::socket::DEFAULT_PORT;

/// Bind the platform server and serve connections forever.
///
/// Only a failure to bind is returned; per connection errors are logged and
/// the server goes back to accepting.
pub fn start<M: Mailbox>(config: ServerConfig, mailbox: M) -> std::io::Result<()> {
    let mut server = ProxyServer::bind(config, mailbox)?;
    server.run()
}
