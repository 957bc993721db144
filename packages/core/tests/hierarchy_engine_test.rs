//! Hierarchy Engine Integration Tests
//!
//! End-to-end checks of the closure-table invariants and the documented
//! scenarios, run against a real libsql database in a temp directory.

#[cfg(test)]
mod hierarchy_engine_tests {
    use anyhow::Result;
    use careerline_core::{
        ClosureEntry, HierarchyConfig, HierarchyEngine, HierarchyError, MetaPatch, NewInsight,
        NewTimelineNode, NodeType, TimelineNode,
    };
    use serde_json::{json, Value};
    use std::collections::HashSet;
    use tempfile::TempDir;

    const OWNER: &str = "user-1";

    async fn create_test_engine() -> Result<(HierarchyEngine, TempDir)> {
        let temp_dir = TempDir::new()?;
        let config = HierarchyConfig::default().with_database_path(temp_dir.path().join("test.db"));
        let engine = HierarchyEngine::open(config).await?;
        Ok((engine, temp_dir))
    }

    async fn create(
        engine: &HierarchyEngine,
        node_type: NodeType,
        parent: Option<&TimelineNode>,
        meta: Value,
    ) -> Result<TimelineNode> {
        let mut params = NewTimelineNode::new(node_type, OWNER, meta);
        if let Some(parent) = parent {
            params = params.with_parent(parent.id.clone());
        }
        Ok(engine.nodes().create_node(params).await?)
    }

    fn ids(nodes: &[TimelineNode]) -> Vec<String> {
        nodes.iter().map(|n| n.id.clone()).collect()
    }

    /// Job -> Project -> Action, plus a second root Job
    async fn seed_tree(
        engine: &HierarchyEngine,
    ) -> Result<(TimelineNode, TimelineNode, TimelineNode, TimelineNode)> {
        let job = create(engine, NodeType::Job, None, json!({"title": "Eng"})).await?;
        let project = create(engine, NodeType::Project, Some(&job), json!({"title": "CLI"})).await?;
        let action =
            create(engine, NodeType::Action, Some(&project), json!({"title": "Ship v1"})).await?;
        let other_job = create(engine, NodeType::Job, None, json!({"title": "Staff"})).await?;
        Ok((job, project, action, other_job))
    }

    #[tokio::test]
    async fn test_scenario_a_root_job() -> Result<()> {
        let (engine, _temp_dir) = create_test_engine().await?;

        let job = create(&engine, NodeType::Job, None, json!({"title": "Eng"})).await?;

        assert!(job.is_root());
        assert!(engine.tree().get_ancestors(&job.id).await?.is_empty());
        let snapshot = engine.tree().closure_snapshot(OWNER).await?;
        assert_eq!(snapshot, vec![ClosureEntry::self_entry(job.id.clone())]);
        Ok(())
    }

    #[tokio::test]
    async fn test_scenario_b_project_under_job() -> Result<()> {
        let (engine, _temp_dir) = create_test_engine().await?;

        let job = create(&engine, NodeType::Job, None, json!({"title": "Eng"})).await?;
        let project = create(&engine, NodeType::Project, Some(&job), json!({"title": "CLI"})).await?;

        assert_eq!(ids(&engine.tree().get_children(&job.id).await?), vec![project.id.clone()]);
        assert_eq!(ids(&engine.tree().get_ancestors(&project.id).await?), vec![job.id.clone()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_scenario_c_three_level_chain() -> Result<()> {
        let (engine, _temp_dir) = create_test_engine().await?;
        let (job, project, action, _) = seed_tree(&engine).await?;

        let ancestors = engine.tree().get_ancestors(&action.id).await?;
        assert_eq!(ids(&ancestors), vec![project.id.clone(), job.id.clone()]);

        let snapshot = engine.tree().closure_snapshot(OWNER).await?;
        assert!(snapshot.contains(&ClosureEntry::new(project.id.clone(), action.id.clone(), 1)));
        assert!(snapshot.contains(&ClosureEntry::new(job.id.clone(), action.id.clone(), 2)));
        Ok(())
    }

    #[tokio::test]
    async fn test_scenario_d_cascade_delete() -> Result<()> {
        let (engine, _temp_dir) = create_test_engine().await?;
        let (job, project, action, other_job) = seed_tree(&engine).await?;

        for node in [&job, &project, &action] {
            engine
                .insights()
                .create_insight(NewInsight::new(&node.id, OWNER, "worth remembering"))
                .await?;
        }

        let result = engine.nodes().delete_node(&job.id, OWNER).await?;
        assert_eq!(result.deleted_ids[0], job.id);
        assert_eq!(result.node_count(), 3);
        assert_eq!(result.deleted_insights, 3);

        let gone: HashSet<String> = result.deleted_ids.iter().cloned().collect();
        for id in &gone {
            assert!(engine.nodes().require_node(id).await.unwrap_err().is_not_found());
            assert!(engine.tree().get_children(id).await.unwrap_err().is_not_found());
        }

        // Count straight from the table: the snapshot joins on live nodes
        let conn = engine.database().connect_with_timeout().await?;
        for id in &gone {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM node_closure WHERE ancestor_id = ?1 OR descendant_id = ?1",
                    [id.as_str()],
                )
                .await?;
            let leaked: i64 = rows.next().await?.expect("count row").get(0)?;
            assert_eq!(leaked, 0, "closure rows left behind for {}", id);

            let mut rows = conn
                .query("SELECT COUNT(*) FROM node_insights WHERE node_id = ?", [id.as_str()])
                .await?;
            let leaked: i64 = rows.next().await?.expect("count row").get(0)?;
            assert_eq!(leaked, 0, "insights left behind for {}", id);
        }

        let mut rows = conn.query("SELECT COUNT(*) FROM node_closure", ()).await?;
        let total: i64 = rows.next().await?.expect("count row").get(0)?;
        assert_eq!(total, 1);
        assert_eq!(
            engine.tree().closure_snapshot(OWNER).await?,
            vec![ClosureEntry::self_entry(other_job.id.clone())]
        );
        assert!(engine.tree().verify_closure(OWNER).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_scenario_e_move_between_jobs() -> Result<()> {
        let (engine, _temp_dir) = create_test_engine().await?;
        let (job, project, action, other_job) = seed_tree(&engine).await?;

        let moved = engine
            .nodes()
            .move_node(&project.id, Some(&other_job.id), OWNER)
            .await?;
        assert_eq!(moved.parent_id.as_deref(), Some(other_job.id.as_str()));

        assert_eq!(
            ids(&engine.tree().get_ancestors(&project.id).await?),
            vec![other_job.id.clone()]
        );
        assert!(engine.tree().get_children(&job.id).await?.is_empty());
        assert_eq!(
            ids(&engine.tree().get_ancestors(&action.id).await?),
            vec![project.id.clone(), other_job.id.clone()]
        );
        assert!(engine.tree().verify_closure(OWNER).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_every_node_has_exactly_one_self_row() -> Result<()> {
        let (engine, _temp_dir) = create_test_engine().await?;
        seed_tree(&engine).await?;

        let nodes = engine.tree().list_nodes(OWNER).await?;
        let snapshot = engine.tree().closure_snapshot(OWNER).await?;
        for node in &nodes {
            let self_rows = snapshot
                .iter()
                .filter(|e| e.descendant_id == node.id && e.ancestor_id == node.id)
                .collect::<Vec<_>>();
            assert_eq!(self_rows.len(), 1);
            assert_eq!(self_rows[0].depth, 0);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_closure_matches_parent_links_after_mixed_writes() -> Result<()> {
        let (engine, _temp_dir) = create_test_engine().await?;
        let (job, project, action, other_job) = seed_tree(&engine).await?;
        let edu = create(&engine, NodeType::Education, None, json!({"title": "MSc"})).await?;
        let thesis = create(&engine, NodeType::Project, Some(&edu), json!({"title": "Thesis"})).await?;

        engine.nodes().move_node(&edu.id, Some(&other_job.id), OWNER).await?;
        engine.nodes().move_node(&action.id, Some(&thesis.id), OWNER).await?;
        engine.nodes().move_node(&project.id, None, OWNER).await?;
        engine.nodes().delete_node(&job.id, OWNER).await?;

        // (a, d, k) exists iff d is reachable from a through k parent links
        let nodes = engine.tree().list_nodes(OWNER).await?;
        let snapshot = engine.tree().closure_snapshot(OWNER).await?;
        let strict_rows = snapshot.iter().filter(|e| e.depth > 0).count();
        let mut walked_links = 0;
        for node in &nodes {
            let mut depth = 0;
            let mut current = Some(node.clone());
            while let Some(ancestor) = current {
                assert!(snapshot.contains(&ClosureEntry::new(
                    ancestor.id.clone(),
                    node.id.clone(),
                    depth
                )));
                walked_links += usize::from(depth > 0);
                depth += 1;
                current = match ancestor.parent_id {
                    Some(parent_id) => Some(engine.nodes().require_node(&parent_id).await?),
                    None => None,
                };
            }
        }
        assert_eq!(walked_links, strict_rows);
        assert!(engine.tree().verify_closure(OWNER).await?);
        assert_eq!(
            ids(&engine.tree().get_ancestors(&action.id).await?),
            vec![thesis.id.clone(), edu.id.clone(), other_job.id.clone()]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_ancestors_extend_parent_chain_by_one() -> Result<()> {
        let (engine, _temp_dir) = create_test_engine().await?;
        let (_, project, action, _) = seed_tree(&engine).await?;

        let parent_ancestors = engine.tree().get_ancestors(&project.id).await?;
        let child_ancestors = engine.tree().get_ancestors(&action.id).await?;

        assert_eq!(child_ancestors[0].id, project.id);
        assert_eq!(ids(&child_ancestors[1..]), ids(&parent_ancestors));

        let snapshot = engine.tree().closure_snapshot(OWNER).await?;
        for (index, ancestor) in child_ancestors.iter().enumerate() {
            assert!(snapshot.contains(&ClosureEntry::new(
                ancestor.id.clone(),
                action.id.clone(),
                index as i64 + 1
            )));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_repeated_reads_are_identical() -> Result<()> {
        let (engine, _temp_dir) = create_test_engine().await?;
        let (job, ..) = seed_tree(&engine).await?;
        create(&engine, NodeType::Event, Some(&job), json!({"title": "Offsite"})).await?;

        let first = engine.tree().get_children(&job.id).await?;
        let second = engine.tree().get_children(&job.id).await?;
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_move_into_own_subtree_is_a_cycle_and_changes_nothing() -> Result<()> {
        let (engine, _temp_dir) = create_test_engine().await?;
        let (job, project, action, _) = seed_tree(&engine).await?;
        let before = engine.tree().closure_snapshot(OWNER).await?;

        for target in [&project, &action, &job] {
            let err = engine
                .nodes()
                .move_node(&job.id, Some(&target.id), OWNER)
                .await
                .unwrap_err();
            assert!(matches!(err, HierarchyError::Cycle { .. }), "{:?}", err);
            assert_eq!(err.status_code(), 422);
        }

        let after = engine.tree().closure_snapshot(OWNER).await?;
        assert_eq!(serde_json::to_vec(&before)?, serde_json::to_vec(&after)?);
        assert_eq!(engine.nodes().require_node(&job.id).await?.parent_id, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_leaf_types_cannot_have_children() -> Result<()> {
        let (engine, _temp_dir) = create_test_engine().await?;
        let (_, project, action, other_job) = seed_tree(&engine).await?;

        let err = create(&engine, NodeType::Project, Some(&action), json!({"title": "Nested"}))
            .await
            .unwrap_err();
        let err = err.downcast::<HierarchyError>()?;
        assert!(matches!(err, HierarchyError::HierarchyViolation(_)));

        let err = engine
            .nodes()
            .move_node(&other_job.id, Some(&action.id), OWNER)
            .await
            .unwrap_err();
        assert!(matches!(err, HierarchyError::HierarchyViolation(_)));

        // Leaf types never appear as a strict ancestor
        let event = create(&engine, NodeType::Event, Some(&project), json!({"title": "Demo"})).await?;
        let snapshot = engine.tree().closure_snapshot(OWNER).await?;
        assert!(snapshot
            .iter()
            .filter(|e| e.depth > 0)
            .all(|e| e.ancestor_id != action.id && e.ancestor_id != event.id));
        Ok(())
    }

    #[tokio::test]
    async fn test_mutations_are_owner_scoped() -> Result<()> {
        let (engine, _temp_dir) = create_test_engine().await?;
        let (job, project, _, _) = seed_tree(&engine).await?;
        let intruder_root = engine
            .nodes()
            .create_node(NewTimelineNode::new(NodeType::Job, "user-2", json!({"title": "Mine"})))
            .await?;

        let forbidden = [
            engine
                .nodes()
                .update_node(&job.id, MetaPatch::new().set("title", "Hacked"), "user-2")
                .await
                .map(|_| ()),
            engine.nodes().delete_node(&job.id, "user-2").await.map(|_| ()),
            engine
                .nodes()
                .move_node(&project.id, Some(&intruder_root.id), "user-2")
                .await
                .map(|_| ()),
            engine
                .nodes()
                .move_node(&project.id, Some(&intruder_root.id), OWNER)
                .await
                .map(|_| ()),
        ];
        for outcome in forbidden {
            let err = outcome.unwrap_err();
            assert!(matches!(err, HierarchyError::Forbidden { .. }), "{:?}", err);
            assert_eq!(err.status_code(), 403);
        }

        assert_eq!(engine.nodes().require_node(&job.id).await?.title(), Some("Eng"));
        assert!(engine.tree().verify_closure(OWNER).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_merges_and_revalidates() -> Result<()> {
        let (engine, _temp_dir) = create_test_engine().await?;
        let job = create(
            &engine,
            NodeType::Job,
            None,
            json!({"title": "Eng", "company": "Acme", "startDate": "2020-01"}),
        )
        .await?;

        let updated = engine
            .nodes()
            .update_node(
                &job.id,
                MetaPatch::new().set("endDate", "2022-06").clear("company"),
                OWNER,
            )
            .await?;
        assert_eq!(updated.meta.get("startDate"), Some(&json!("2020-01")));
        assert_eq!(updated.meta.get("endDate"), Some(&json!("2022-06")));
        assert!(!updated.meta.contains_key("company"));

        let err = engine
            .nodes()
            .update_node(&job.id, MetaPatch::new().set("endDate", "2019-01"), OWNER)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);

        let stored = engine.nodes().require_node(&job.id).await?;
        assert_eq!(stored.meta, updated.meta);
        Ok(())
    }

    #[tokio::test]
    async fn test_rebuild_restores_a_damaged_index() -> Result<()> {
        let (engine, _temp_dir) = create_test_engine().await?;
        let (_, project, action, _) = seed_tree(&engine).await?;
        let before = engine.tree().closure_snapshot(OWNER).await?;

        let conn = engine.database().connect_with_timeout().await?;
        conn.execute(
            "DELETE FROM node_closure WHERE descendant_id = ? AND depth > 0",
            [action.id.as_str()],
        )
        .await?;
        assert!(!engine.tree().verify_closure(OWNER).await?);

        let written = engine.nodes().rebuild_closures(OWNER).await?;
        assert_eq!(written as usize, before.len());
        assert_eq!(engine.tree().closure_snapshot(OWNER).await?, before);
        assert_eq!(
            engine.tree().get_ancestors(&action.id).await?[0].id,
            project.id
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_permission_filtered_forest() -> Result<()> {
        let (engine, _temp_dir) = create_test_engine().await?;
        let (job, ..) = seed_tree(&engine).await?;

        let own = engine.permissions().filter_visible_tree(OWNER, OWNER).await?;
        assert_eq!(own.len(), 2);
        assert_eq!(own.iter().find(|t| t.node.id == job.id).map(|t| t.size()), Some(3));

        let stranger = engine
            .permissions()
            .filter_visible_tree(OWNER, "user-2")
            .await?;
        assert!(stranger.is_empty());
        Ok(())
    }
}
