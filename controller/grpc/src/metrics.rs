use crate::resources::TypeUrl;
use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue, LabelValueEncoder},
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use std::fmt::Write;

/// Discovery server metrics.
#[derive(Clone, Debug, Default)]
pub struct ServerMetrics {
    streams: Family<StreamLabels, Gauge>,
    responses: Family<TypeLabels, Counter>,
    nacks: Family<TypeLabels, Counter>,
}

/// Metrics handle held by an open stream.
///
/// The stream gauge is decremented when the handle is dropped.
#[derive(Debug)]
pub(crate) struct StreamMetrics {
    kind: StreamKind,
    server: ServerMetrics,
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub(crate) enum StreamKind {
    Sotw,
    Delta,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct StreamLabels {
    kind: StreamKind,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct TypeLabels {
    type_url: TypeUrl,
}

// === impl ServerMetrics ===

impl ServerMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let metrics = Self::default();
        reg.register(
            "streams_open",
            "The number of open discovery streams",
            metrics.streams.clone(),
        );
        reg.register(
            "responses",
            "The number of discovery responses sent",
            metrics.responses.clone(),
        );
        reg.register(
            "nacks",
            "The number of discovery responses rejected by clients",
            metrics.nacks.clone(),
        );
        metrics
    }

    pub(crate) fn open(&self, kind: StreamKind) -> StreamMetrics {
        self.streams.get_or_create(&StreamLabels { kind }).inc();
        StreamMetrics {
            kind,
            server: self.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn open_streams(&self, kind: StreamKind) -> i64 {
        self.streams.get_or_create(&StreamLabels { kind }).get()
    }

    #[cfg(test)]
    pub(crate) fn nack_count(&self, type_url: TypeUrl) -> u64 {
        self.nacks.get_or_create(&TypeLabels { type_url }).get()
    }
}

// === impl StreamMetrics ===

impl StreamMetrics {
    pub(crate) fn response(&self, type_url: TypeUrl) {
        self.server
            .responses
            .get_or_create(&TypeLabels { type_url })
            .inc();
    }

    pub(crate) fn nack(&self, type_url: TypeUrl) {
        self.server.nacks.get_or_create(&TypeLabels { type_url }).inc();
    }
}

impl Drop for StreamMetrics {
    fn drop(&mut self) {
        self.server
            .streams
            .get_or_create(&StreamLabels { kind: self.kind })
            .dec();
    }
}

// === impl TypeUrl ===

impl EncodeLabelValue for TypeUrl {
    fn encode(&self, encoder: &mut LabelValueEncoder<'_>) -> std::fmt::Result {
        encoder.write_str(self.as_str())
    }
}
