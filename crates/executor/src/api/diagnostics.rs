//! Diagnostics and ping.

use crate::callback::{Callbacks, Pending};
use crate::codec::Transcoder;
use crate::connection::Connection;
use crate::dispatch::Call;
use crate::options::PingOptions;
use tether_core::Result;
use tether_engine::{Cluster, DiagnosticsReport, Handler, PingReport, PingRequest, ServiceType};

impl Connection {
    fn diagnostics_call(&self, report_id: Option<String>) -> Call<DiagnosticsReport, DiagnosticsReport> {
        Call::new(
            "diagnostics",
            move |cluster: &dyn Cluster, handler: Handler<DiagnosticsReport>| {
                cluster.diagnostics(report_id, handler)
            },
            |report, _: &dyn Transcoder| Ok(report),
        )
    }

    fn ping_call(&self, options: PingOptions) -> Call<PingReport, PingReport> {
        let mut services = options.services;
        if services.is_empty() {
            services = ServiceType::ALL.to_vec();
        }
        let request = PingRequest {
            report_id: options.report_id,
            services,
        };
        Call::new(
            "ping",
            move |cluster: &dyn Cluster, handler: Handler<PingReport>| cluster.ping(request, handler),
            |report, _: &dyn Transcoder| Ok(report),
        )
    }

    /// Report the state of every endpoint without sending anything.
    pub fn diagnostics(&self, report_id: Option<String>) -> Result<DiagnosticsReport> {
        self.blocking(self.diagnostics_call(report_id))
    }

    /// [`diagnostics`](Connection::diagnostics) with callbacks.
    pub fn diagnostics_with(
        &self,
        report_id: Option<String>,
        callbacks: Callbacks<DiagnosticsReport>,
    ) -> Result<Pending> {
        self.with_callbacks(self.diagnostics_call(report_id), callbacks)
    }

    /// Ping the requested services, or every service.
    pub fn ping(&self, options: PingOptions) -> Result<PingReport> {
        self.blocking(self.ping_call(options))
    }

    /// [`ping`](Connection::ping) with callbacks.
    pub fn ping_with(&self, options: PingOptions, callbacks: Callbacks<PingReport>) -> Result<Pending> {
        self.with_callbacks(self.ping_call(options), callbacks)
    }
}
