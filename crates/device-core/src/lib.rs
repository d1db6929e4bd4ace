pub mod device;
pub mod framing;
pub mod handler;
pub mod handlers;
pub mod models;
pub mod protocol;
pub mod status;
pub mod tensor;
pub mod worker;

pub use device::{DeviceContext, DeviceError, DeviceId};
pub use handler::{DynHandler, HandlerAdapter, HandlerError, ModelHandler};
pub use models::{InferOutcome, LoadOutcome, ModelKey, ModelTable, ModelTableError, UnloadOutcome};
pub use protocol::{build_response, protocol_error_response, WireAction, WireRequest};
pub use status::{snapshot, DeviceStatusSnapshot, LoadedModelInfo, StatusSnapshot};
pub use tensor::{DType, Tensor, TensorError, TensorPayload};
pub use worker::{spawn_queue, Action, ManagerState, Request, RequestQueue, RequestQueueClosed, Response};
