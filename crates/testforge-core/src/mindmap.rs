//! Mind-map derivation from test cases.
//!
//! The graph is a pure function of the ordered test-case list:
//!
//! ```text
//! @root ─┬─ <tc id> ─┬─ <tc id>/step/1
//!        │           ├─ <tc id>/step/2
//!        │           └─ <tc id>/expected
//!        └─ <tc id> ─ ...
//! ```
//!
//! Node ids come from the test case id and the local path, so rebuilding
//! from an unchanged set yields the same nodes and edges; only the map's
//! version moves. The layout hint is stored but never changes the graph.
//!
//! Manual edits ([`update_mind_map`]) replace nodes or edges wholesale and
//! must keep every edge between existing nodes. A later rebuild discards
//! them in favour of the derived graph.

use std::collections::HashSet;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    LayoutHint, MindMap, MindMapEdge, MindMapNode, MindMapPatch, MindMapStatus, NodeKind, TestCase,
};
use crate::store::{load_test_cases, Store};

pub const ROOT_NODE_ID: &str = "@root";
pub const DEFAULT_TITLE: &str = "Test Case Mind Map";

/// Derive nodes and edges. Repeated test case ids are taken once.
pub fn build_graph(title: &str, cases: &[TestCase]) -> (Vec<MindMapNode>, Vec<MindMapEdge>) {
    let mut nodes = vec![MindMapNode {
        id: ROOT_NODE_ID.to_string(),
        label: title.to_string(),
        kind: NodeKind::Root,
    }];
    let mut edges = Vec::new();
    let mut seen = HashSet::new();

    for tc in cases {
        if !seen.insert(tc.id.as_str()) {
            continue;
        }
        nodes.push(MindMapNode {
            id: tc.id.clone(),
            label: tc.title.clone(),
            kind: NodeKind::TestCase,
        });
        edges.push(edge(ROOT_NODE_ID, &tc.id));

        for (i, step) in tc.steps.iter().enumerate() {
            let id = format!("{}/step/{}", tc.id, i + 1);
            edges.push(edge(&tc.id, &id));
            nodes.push(MindMapNode {
                id,
                label: step.clone(),
                kind: NodeKind::Step,
            });
        }

        let id = format!("{}/expected", tc.id);
        edges.push(edge(&tc.id, &id));
        nodes.push(MindMapNode {
            id,
            label: tc.expected_result.clone(),
            kind: NodeKind::ExpectedResult,
        });
    }

    (nodes, edges)
}

/// Node ids must be unique and non-blank; edges must join existing nodes.
pub fn validate_graph(nodes: &[MindMapNode], edges: &[MindMapEdge]) -> Result<()> {
    let mut ids = HashSet::with_capacity(nodes.len());
    for node in nodes {
        if node.id.trim().is_empty() {
            return Err(Error::InvalidInput("mind map node ids must not be blank".to_string()));
        }
        if !ids.insert(node.id.as_str()) {
            return Err(Error::InvalidInput(format!("duplicate mind map node {}", node.id)));
        }
    }
    if let Some(e) = edges
        .iter()
        .find(|e| !ids.contains(e.source.as_str()) || !ids.contains(e.target.as_str()))
    {
        return Err(Error::InvalidInput(format!(
            "edge {} -> {} references a node that is not in the map",
            e.source, e.target
        )));
    }
    Ok(())
}

fn edge(source: &str, target: &str) -> MindMapEdge {
    MindMapEdge {
        source: source.to_string(),
        target: target.to_string(),
    }
}

/// Build and persist a new map (version 1) over the given test cases.
pub async fn build_mind_map<S: Store + ?Sized>(
    store: &S,
    test_case_ids: &[String],
    layout: LayoutHint,
    title: Option<&str>,
) -> Result<MindMap> {
    if test_case_ids.is_empty() {
        return Err(Error::InvalidInput(
            "a mind map needs at least one test case".to_string(),
        ));
    }
    let cases = load_test_cases(store, test_case_ids).await?;
    let title = title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TITLE)
        .to_string();

    let (nodes, edges) = build_graph(&title, &cases);
    let now = chrono::Utc::now().timestamp();
    let map = MindMap {
        id: Uuid::new_v4().to_string(),
        title,
        nodes,
        edges,
        test_case_ids: test_case_ids.to_vec(),
        layout,
        version: 1,
        status: MindMapStatus::Active,
        created_at: now,
        updated_at: now,
    };
    store.save_mind_map(&map).await?;
    Ok(map)
}

/// Re-derive a map from its test cases and bump its version.
///
/// # Errors
///
/// [`Error::NotFound`] for an unknown map or a deleted test case,
/// [`Error::Conflict`] when the map is archived.
pub async fn rebuild_mind_map<S: Store + ?Sized>(store: &S, id: &str) -> Result<MindMap> {
    let mut map = store
        .get_mind_map(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("mind map {}", id)))?;
    if map.status == MindMapStatus::Archived {
        return Err(Error::Conflict(format!("mind map {} is archived", id)));
    }

    let cases = load_test_cases(store, &map.test_case_ids).await?;
    let (nodes, edges) = build_graph(&map.title, &cases);
    map.nodes = nodes;
    map.edges = edges;
    map.version += 1;
    map.updated_at = chrono::Utc::now().timestamp();
    store.save_mind_map(&map).await?;
    Ok(map)
}

/// Apply a manual edit and bump the version.
///
/// # Errors
///
/// [`Error::NotFound`] for an unknown map, [`Error::Conflict`] when it is
/// archived, [`Error::InvalidInput`] for an empty patch, a blank title or a
/// graph that fails [`validate_graph`]. Nothing is stored on error.
pub async fn update_mind_map<S: Store + ?Sized>(
    store: &S,
    id: &str,
    patch: MindMapPatch,
) -> Result<MindMap> {
    if patch.is_empty() {
        return Err(Error::InvalidInput("mind map edit changes nothing".to_string()));
    }
    let mut map = store
        .get_mind_map(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("mind map {}", id)))?;
    if map.status == MindMapStatus::Archived {
        return Err(Error::Conflict(format!("mind map {} is archived", id)));
    }

    if let Some(title) = patch.title {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::InvalidInput("mind map title must not be blank".to_string()));
        }
        map.title = title.to_string();
    }
    if let Some(nodes) = patch.nodes {
        map.nodes = nodes;
    }
    if let Some(edges) = patch.edges {
        map.edges = edges;
    }
    if let Some(layout) = patch.layout {
        map.layout = layout;
    }
    validate_graph(&map.nodes, &map.edges)?;

    map.version += 1;
    map.updated_at = chrono::Utc::now().timestamp();
    store.save_mind_map(&map).await?;
    Ok(map)
}

/// Archive a map. Archiving twice is a no-op.
pub async fn archive_mind_map<S: Store + ?Sized>(store: &S, id: &str) -> Result<MindMap> {
    let mut map = store
        .get_mind_map(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("mind map {}", id)))?;
    if map.status != MindMapStatus::Archived {
        map.status = MindMapStatus::Archived;
        map.updated_at = chrono::Utc::now().timestamp();
        store.save_mind_map(&map).await?;
    }
    Ok(map)
}
