pub(crate) mod document_source;
pub(crate) mod model_gateway;

pub(crate) use document_source::DocumentSourceClient;
pub(crate) use model_gateway::ModelGatewayClient;
