pub mod event_channel;
pub mod mutation_log;
pub mod notifier;
pub mod request_gateway;
pub mod upload_transport;

pub use event_channel::{ChannelEvent, ChannelState, EventChannel};
pub use mutation_log::MutationLog;
pub use notifier::{BroadcastNotifier, NoticeLevel, Notifier, UserNotice};
pub use request_gateway::{GatewayRequest, GatewayResponse, RequestGateway};
pub use upload_transport::{UploadSource, UploadTransport};
