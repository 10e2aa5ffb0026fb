use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::invocation::{RpcPayload, RpcRequest, RpcResponse};

use super::{DecodeTemplate, SerializeContext, Serializer};

pub const JSON_SERIALIZER: &str = "json";

/// 以 `serde_json` 实现的序列化器，本身不做安全检查。
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    fn to_bytes<T: Serialize>(value: &T, context: &SerializeContext) -> Result<Bytes> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|err| context.serialize_error(err))
    }

    fn from_bytes<T: DeserializeOwned>(bytes: &[u8], context: &SerializeContext) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|err| context.deserialize_error(err))
    }
}

impl Serializer for JsonSerializer {
    fn encode(&self, payload: &RpcPayload, context: &SerializeContext) -> Result<Bytes> {
        Self::to_bytes(payload, context)
    }

    fn decode(
        &self,
        bytes: &[u8],
        template: &DecodeTemplate,
        context: &SerializeContext,
    ) -> Result<RpcPayload> {
        let payload: RpcPayload = Self::from_bytes(bytes, context)?;
        template.verify(&payload, context)?;
        Ok(payload)
    }

    fn encode_request(&self, request: &RpcRequest, context: &SerializeContext) -> Result<Bytes> {
        Self::to_bytes(request, context)
    }

    fn decode_request(&self, bytes: &[u8], context: &SerializeContext) -> Result<RpcRequest> {
        Self::from_bytes(bytes, context)
    }

    fn encode_response(
        &self,
        response: &RpcResponse,
        context: &SerializeContext,
    ) -> Result<Bytes> {
        Self::to_bytes(response, context)
    }

    fn decode_response(
        &self,
        bytes: &[u8],
        template: &DecodeTemplate,
        context: &SerializeContext,
    ) -> Result<RpcResponse> {
        let response: RpcResponse = Self::from_bytes(bytes, context)?;
        if let Some(value) = &response.value {
            template.verify(value, context)?;
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::Side;
    use serde_json::json;

    #[test]
    fn request_keeps_arguments_and_attachments() {
        let context = SerializeContext::new(Side::Consumer);
        let mut request = RpcRequest::new("com.demo.Echo", "echo")
            .with_arg(RpcPayload::new("java.lang.String", json!("hello")));
        request.attach("trace", "t-1");

        let bytes = JsonSerializer.encode_request(&request, &context).unwrap();
        let decoded = JsonSerializer.decode_request(&bytes, &context).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn malformed_bytes_are_tagged_with_side() {
        let err = JsonSerializer
            .decode_request(b"{not json", &SerializeContext::new(Side::Provider))
            .expect_err("非法 JSON 应失败");
        assert_eq!(err.code(), "rpc.deserialize.server");
    }
}
