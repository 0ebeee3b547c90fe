//! Expansion of polymorphic roots.
//!
//! A root over an unmapped polymorphic type stands for every implementor.
//! The tree is copied once per combination of implementors with the root
//! entity replaced; from-node ids are preserved so every expression of the
//! copy still resolves.

use orql_proto::{FromId, FromNodeKind, QueryTree, TreeStatement};

use crate::error::Error;
use crate::metamodel::Metamodel;

/// Split `tree` into one tree per combination of polymorphic root
/// implementors. Trees without polymorphic roots come back as the only
/// element; a type without implementors yields no trees.
pub fn split_polymorphic(model: &Metamodel, tree: &QueryTree) -> Result<Vec<QueryTree>, Error> {
    let roots: Vec<FromId> = match &tree.statement {
        TreeStatement::Select(select) => select.roots.clone(),
        TreeStatement::Update(update) => vec![update.target],
        TreeStatement::Delete(delete) => vec![delete.target],
    };

    let mut choices: Vec<(FromId, &[String])> = Vec::new();
    for root in roots {
        let entity = tree
            .root_entity(root)
            .ok_or_else(|| Error::Parsing(format!("{} is not a query root", root)))?;
        if model.get_entity(entity).is_some() {
            continue;
        }
        match model.polymorphic_implementors(entity) {
            Some(implementors) => choices.push((root, implementors)),
            None => return Err(Error::UnknownEntity(entity.to_string())),
        }
    }
    if choices.is_empty() {
        return Ok(vec![tree.clone()]);
    }

    let mut combinations: Vec<Vec<(FromId, &str)>> = vec![Vec::new()];
    for (root, implementors) in &choices {
        combinations = combinations
            .into_iter()
            .flat_map(|prefix| {
                implementors.iter().map(move |implementor| {
                    let mut next = prefix.clone();
                    next.push((*root, implementor.as_str()));
                    next
                })
            })
            .collect();
    }

    Ok(combinations
        .into_iter()
        .map(|combination| {
            let mut nodes = tree.nodes().to_vec();
            for (root, implementor) in combination {
                if let Some(node) = nodes.get_mut(root.index()) {
                    node.kind = FromNodeKind::Root {
                        entity: implementor.to_string(),
                    };
                }
            }
            QueryTree::from_parts(nodes, tree.statement.clone())
        })
        .collect())
}
