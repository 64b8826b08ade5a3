//! HTTP surface of the balancer: the JSON-RPC endpoint miners talk to and the
//! webhook endpoints nodes post notifications to.

pub mod middleware;
pub mod router;
