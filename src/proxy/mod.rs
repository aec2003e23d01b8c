pub mod deadline;
pub mod dialer;
pub mod relay;
pub mod session;
pub mod tls_acceptor;
