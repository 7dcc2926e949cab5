pub mod classify;
pub mod instructions;
pub mod interceptor;
pub mod model_map;
pub mod request_log;
pub mod sse;
pub mod transform;

pub use interceptor::{CodexGateway, OutboundRequest, UpstreamBody, UpstreamResponse};
pub use transform::{TransformOutcome, Transformer};
