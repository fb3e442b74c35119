//! Selectors and operation descriptors.

use serde::{Deserialize, Serialize};

use crate::{DataId, Fragment, FragmentRef, Request, RequestFingerprint, Variables};

/// Address of a read in the normalized store: a record plus the node
/// (query root or fragment) to read from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    pub data_id: DataId,
    pub node: String,
    pub variables: Variables,
    pub owner: Option<RequestFingerprint>,
}

/// One selector per referenced record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectorSet {
    Singular(Selector),
    Plural(Vec<Selector>),
}

impl SelectorSet {
    /// Resolve the selectors `fragment` reads through `reference`.
    ///
    /// Returns None when the reference does not match the fragment: a record
    /// the fragment was not spread onto, or a singular/plural mismatch.
    pub fn for_fragment(
        fragment: &Fragment,
        reference: &FragmentRef,
        variables: &Variables,
    ) -> Option<Self> {
        let select = |entity: &crate::EntityRef| -> Option<Selector> {
            if !entity.spreads(&fragment.name) {
                return None;
            }
            Some(Selector {
                data_id: entity.id.clone(),
                node: fragment.name.clone(),
                variables: variables.clone(),
                owner: entity.owner.clone(),
            })
        };

        match (fragment.plural, reference) {
            (false, FragmentRef::Singular(entity)) => select(entity).map(SelectorSet::Singular),
            (true, FragmentRef::Plural(entities)) => entities
                .iter()
                .map(select)
                .collect::<Option<Vec<_>>>()
                .map(SelectorSet::Plural),
            _ => None,
        }
    }
}

/// A request bound to concrete variables, with its fingerprint and root
/// selector precomputed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDescriptor {
    pub request: Request,
    pub variables: Variables,
    pub fingerprint: RequestFingerprint,
    pub root: Selector,
}

impl OperationDescriptor {
    pub fn new(request: Request, variables: Variables) -> Self {
        let fingerprint = RequestFingerprint::for_request(&request, &variables);
        let root = Selector {
            data_id: DataId::root(),
            node: request.name.clone(),
            variables: variables.clone(),
            owner: Some(fingerprint.clone()),
        };
        Self {
            request,
            variables,
            fingerprint,
            root,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EntityRef, ROOT_ID};

    #[test]
    fn test_operation_root_selector() {
        let op = OperationDescriptor::new(
            Request::persisted("UserQuery", "R1"),
            Variables::new().with("id", "1"),
        );
        assert_eq!(op.root.data_id.as_str(), ROOT_ID);
        assert_eq!(op.root.node, "UserQuery");
        assert_eq!(op.root.owner.as_ref(), Some(&op.fingerprint));
    }

    #[test]
    fn test_singular_fragment_selector() {
        let fragment = Fragment::new("UserCard_user");
        let reference = FragmentRef::from(EntityRef::new("user:1").spreading("UserCard_user"));
        let selectors = SelectorSet::for_fragment(&fragment, &reference, &Variables::new());
        match selectors {
            Some(SelectorSet::Singular(selector)) => {
                assert_eq!(selector.data_id.as_str(), "user:1");
                assert_eq!(selector.node, "UserCard_user");
            }
            other => panic!("expected singular selector, got {:?}", other),
        }
    }

    #[test]
    fn test_fragment_selector_requires_spread() {
        let fragment = Fragment::new("UserCard_user");
        let reference = FragmentRef::from(EntityRef::new("user:1").spreading("Other_user"));
        assert!(SelectorSet::for_fragment(&fragment, &reference, &Variables::new()).is_none());
    }

    #[test]
    fn test_plural_fragment_selector_requires_every_spread() {
        let fragment = Fragment::plural("Friends_users");
        let all = FragmentRef::Plural(vec![
            EntityRef::new("a").spreading("Friends_users"),
            EntityRef::new("b").spreading("Friends_users"),
        ]);
        let partial = FragmentRef::Plural(vec![
            EntityRef::new("a").spreading("Friends_users"),
            EntityRef::new("b"),
        ]);
        assert!(matches!(
            SelectorSet::for_fragment(&fragment, &all, &Variables::new()),
            Some(SelectorSet::Plural(ref s)) if s.len() == 2
        ));
        assert!(SelectorSet::for_fragment(&fragment, &partial, &Variables::new()).is_none());
    }

    #[test]
    fn test_fragment_selector_rejects_shape_mismatch() {
        let plural = Fragment::plural("Friends_users");
        let singular_ref = FragmentRef::from(EntityRef::new("a").spreading("Friends_users"));
        assert!(SelectorSet::for_fragment(&plural, &singular_ref, &Variables::new()).is_none());
    }
}
