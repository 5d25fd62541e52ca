//! Calls into the supervised daemon's remote interface.
//!
//! Only the two calls the supervisor relies on are modelled here: a
//! no-argument status call used for readiness probing, and the cooperative
//! shutdown call used on teardown.

use std::{net::SocketAddr, time::Duration};

use async_trait::async_trait;
use tonic::{
    codec::ProstCodec,
    codegen::http::uri::PathAndQuery,
    transport::{Channel, Endpoint},
};

use crate::ControlError;

pub const SERVICE_NAME: &str = "centy.CentyDaemon";

const GET_DAEMON_INFO_PATH: &str = "/centy.CentyDaemon/GetDaemonInfo";
const SHUTDOWN_PATH: &str = "/centy.CentyDaemon/Shutdown";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct GetDaemonInfoRequest {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DaemonInfo {
    #[prost(string, tag = "1")]
    pub version: String,
    #[prost(string, repeated, tag = "2")]
    pub available_versions: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct ShutdownRequest {
    #[prost(uint32, tag = "1")]
    pub delay_seconds: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ShutdownResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub message: String,
}

/// The slice of the daemon's remote interface the supervisor depends on.
///
/// Implementations must be cheap to call repeatedly: `status` is issued on
/// every poll tick while an instance is starting.
#[async_trait]
pub trait ControlPlane: Send + Sync + 'static {
    /// Succeeds once the daemon at `endpoint` answers a status request.
    async fn status(&self, endpoint: SocketAddr) -> Result<(), ControlError>;

    /// Asks the daemon at `endpoint` to terminate itself after `delay_seconds`.
    ///
    /// A successful return only means the request was answered; whether the
    /// daemon reported success is not inspected.
    async fn shutdown(&self, endpoint: SocketAddr, delay_seconds: u32) -> Result<(), ControlError>;
}

/// [`ControlPlane`] over plaintext gRPC.
#[derive(Debug, Clone)]
pub struct GrpcControl {
    request_timeout: Duration,
}

impl GrpcControl {
    pub fn new() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Bounds connection setup and each individual call.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Fetches the daemon's version information.
    pub async fn daemon_info(&self, endpoint: SocketAddr) -> Result<DaemonInfo, ControlError> {
        self.unary(endpoint, GET_DAEMON_INFO_PATH, GetDaemonInfoRequest {})
            .await
    }

    async fn connect(&self, endpoint: SocketAddr) -> Result<Channel, ControlError> {
        let channel = Endpoint::from_shared(format!("http://{endpoint}"))
            .map_err(|e| ControlError::InvalidEndpoint {
                endpoint,
                reason: e.to_string(),
            })?
            .connect_timeout(self.request_timeout)
            .timeout(self.request_timeout)
            .connect()
            .await?;
        Ok(channel)
    }

    async fn unary<Req, Resp>(
        &self,
        endpoint: SocketAddr,
        path: &'static str,
        request: Req,
    ) -> Result<Resp, ControlError>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let call = async {
            let mut grpc = tonic::client::Grpc::new(self.connect(endpoint).await?);
            grpc.ready().await?;
            let response: tonic::Response<Resp> = grpc
                .unary(
                    tonic::Request::new(request),
                    PathAndQuery::from_static(path),
                    ProstCodec::default(),
                )
                .await?;
            Ok::<_, ControlError>(response.into_inner())
        };
        tokio::time::timeout(self.request_timeout, call)
            .await
            .map_err(|_| ControlError::Timeout(self.request_timeout))?
    }
}

impl Default for GrpcControl {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControlPlane for GrpcControl {
    async fn status(&self, endpoint: SocketAddr) -> Result<(), ControlError> {
        self.daemon_info(endpoint).await.map(|_| ())
    }

    async fn shutdown(&self, endpoint: SocketAddr, delay_seconds: u32) -> Result<(), ControlError> {
        let response: ShutdownResponse = self
            .unary(endpoint, SHUTDOWN_PATH, ShutdownRequest { delay_seconds })
            .await?;
        tracing::debug!(
            %endpoint,
            success = response.success,
            message = %response.message,
            "daemon answered shutdown request"
        );
        Ok(())
    }
}
