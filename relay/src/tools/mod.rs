//! The default capability set exposed by every session.

use serde_json::Value;

use crate::adapters::AdapterId;
use crate::errors::Result;
use crate::registry::CapabilityRegistry;
use crate::session::Session;

pub mod data;
pub mod notification;
pub mod onboarding;
pub mod payment;
pub mod system;

/// Builds the registry in the order clients see it in `tools/list`.
pub fn default_registry() -> Result<CapabilityRegistry> {
    let mut builder = CapabilityRegistry::builder();
    for descriptor in system::descriptors()
        .into_iter()
        .chain(data::descriptors())
        .chain(payment::descriptors())
        .chain(notification::descriptors())
        .chain(onboarding::descriptors())
    {
        builder.register(descriptor)?;
    }
    Ok(builder.build())
}

/// Passes validated arguments straight to one adapter operation.
pub(crate) async fn forward(
    session: &Session,
    adapter: AdapterId,
    operation: &str,
    args: Value,
) -> Result<Value> {
    session.adapter(adapter)?.call(operation, args).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_tools_in_stable_order() {
        let registry = default_registry().expect("default registry");
        let names: Vec<_> = registry.names().collect();
        assert_eq!(names.first(), Some(&"session_info"));
        assert_eq!(names.last(), Some(&"onboard_customer"));
        assert_eq!(names.len(), 19);
        let onboarding = registry.resolve("onboard_customer").expect("onboarding");
        assert_eq!(
            onboarding.required_adapters,
            vec![AdapterId::Payment, AdapterId::Data, AdapterId::Notification]
        );
        assert!(registry.resolve("session_info").unwrap().required_adapters.is_empty());
    }

    #[test]
    fn every_tool_describes_an_object_schema() {
        let registry = default_registry().expect("default registry");
        for summary in registry.list_all() {
            assert_eq!(summary.input_schema["type"], "object", "{}", summary.name);
            assert!(!summary.description.is_empty(), "{}", summary.name);
        }
    }
}
