//! End-to-end runs of compiled fixtures against the in-memory host.

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use crate::compile::compile_all;
    use crate::config::CompileOptions;
    use crate::events::EventKind;
    use crate::fixtures;
    use crate::regions::{Branch, ChildId, RegionId};
    use crate::runtime::{Instance, MemoryHost, NodeHandle, Program, Runtime, RuntimeError};

    fn runtime() -> Runtime<MemoryHost> {
        let options = CompileOptions {
            emit_js: false,
            use_cache: false,
            ..CompileOptions::default()
        };
        let compiled = compile_all(&fixtures::all(), &options)
            .into_iter()
            .map(|result| result.expect("fixture compiles"));
        Runtime::new(Program::from_compiled(compiled), MemoryHost::new())
    }

    fn mounted(component: &str) -> Runtime<MemoryHost> {
        let mut rt = runtime();
        let root = rt.host().root();
        rt.mount(component, Vec::new(), root).expect("mounts");
        rt
    }

    fn root(rt: &Runtime<MemoryHost>) -> &Instance {
        rt.root().expect("mounted")
    }

    fn slot(rt: &Runtime<MemoryHost>, slot: u32) -> NodeHandle {
        root(rt).node(slot).expect("slot is live")
    }

    fn click(rt: &mut Runtime<MemoryHost>, node: NodeHandle) -> bool {
        rt.dispatch(EventKind::Click, node, Value::Null)
            .expect("dispatch succeeds")
    }

    fn text(rt: &Runtime<MemoryHost>, node: NodeHandle) -> String {
        rt.host().text_content(node)
    }

    fn texts(rt: &Runtime<MemoryHost>, tag: &str) -> Vec<String> {
        rt.host()
            .find_all(tag)
            .into_iter()
            .map(|n| text(rt, n))
            .collect()
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // UPDATES AND FLUSHING
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_counter_click_updates_text() {
        let mut rt = mounted("Counter");
        let button = slot(&rt, 0);
        assert_eq!(text(&rt, button), "0");

        let flushes = rt.host().stats().flushes;
        assert!(click(&mut rt, button));
        assert_eq!(text(&rt, button), "1");
        assert_eq!(rt.host().stats().flushes - flushes, 1);
        assert_eq!(rt.context().depth(), 0);
        assert_eq!(root(&rt).field("count"), Some(&json!(1)));
    }

    #[test]
    fn test_branch_flip_flushes_once() {
        let mut rt = mounted("Scoreboard");
        let flushes = rt.host().stats().flushes;
        rt.invoke("set_score", vec![json!(10)]).expect("invoke");
        assert_eq!(rt.host().stats().flushes - flushes, 1);
        assert_eq!(text(&rt, slot(&rt, 1)), "10");
    }

    #[test]
    fn test_unlistened_node_is_not_dispatched() {
        let mut rt = mounted("Scoreboard");
        let paragraph = slot(&rt, 1);
        assert!(!click(&mut rt, paragraph));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // CONDITIONALS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_conditional_flip_swaps_branch_listeners() {
        let mut rt = mounted("Scoreboard");
        assert_eq!(root(&rt).branch(RegionId(0)), Some(Branch::Else));
        assert_eq!(rt.context().registrations(), 1);
        assert!(root(&rt).node(3).is_none());

        rt.invoke("set_score", vec![json!(10)]).expect("invoke");
        assert_eq!(root(&rt).branch(RegionId(0)), Some(Branch::Then));
        assert!(root(&rt).node(4).is_none());
        assert_eq!(rt.context().registrations(), 2);
        assert_eq!(texts(&rt, "span"), vec!["Winner"]);

        let reset = slot(&rt, 3);
        assert!(click(&mut rt, reset));
        assert_eq!(text(&rt, slot(&rt, 1)), "0");
        assert_eq!(root(&rt).branch(RegionId(0)), Some(Branch::Else));
        assert_eq!(rt.context().registrations(), 1);
        assert!(rt.context().table(EventKind::Click).get(reset).is_none());
        assert!(!rt.host().is_attached(reset));
        assert!(!click(&mut rt, reset));
        assert_eq!(rt.host().stats().double_removals, 0);
    }

    #[test]
    fn test_resync_to_same_branch_touches_nothing() {
        let mut rt = mounted("Panel");
        let before = rt.host().stats();
        rt.invoke("refresh", Vec::new()).expect("invoke");
        let after = rt.host().stats();
        assert_eq!(after.created, before.created);
        assert_eq!(after.removed, before.removed);
        assert_eq!(after.flushes, before.flushes + 1);
    }

    #[test]
    fn test_teardown_reaches_nested_regions_and_children() {
        let mut rt = mounted("Panel");
        assert_eq!(root(&rt).branch(RegionId(1)), Some(Branch::Then));
        assert!(root(&rt).child(ChildId(0)).is_some());
        assert_eq!(texts(&rt, "p"), vec!["Detail"]);
        assert_eq!(rt.host().find_all("span").len(), 1);

        rt.invoke("toggle", Vec::new()).expect("close");
        assert_eq!(root(&rt).branch(RegionId(0)), Some(Branch::Else));
        assert_eq!(root(&rt).branch(RegionId(1)), None);
        assert!(root(&rt).child(ChildId(0)).is_none());
        for id in 0..3 {
            assert!(root(&rt).node(id).is_none());
        }
        assert!(rt.host().find_all("h3").is_empty());
        assert!(rt.host().find_all("p").is_empty());
        assert!(rt.host().find_all("span").is_empty());
        assert_eq!(rt.host().stats().double_removals, 0);

        rt.invoke("toggle", Vec::new()).expect("reopen");
        assert_eq!(root(&rt).branch(RegionId(1)), Some(Branch::Then));
        assert!(root(&rt).child(ChildId(0)).is_some());
        assert_eq!(texts(&rt, "p"), vec!["Detail"]);
    }

    #[test]
    fn test_nested_region_toggles_independently() {
        let mut rt = mounted("Panel");
        rt.invoke("toggle_detail", Vec::new()).expect("invoke");
        assert_eq!(root(&rt).branch(RegionId(0)), Some(Branch::Then));
        assert_eq!(root(&rt).branch(RegionId(1)), Some(Branch::Else));
        assert!(rt.host().find_all("p").is_empty());
        assert_eq!(rt.host().find_all("h3").len(), 1);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // REPETITIONS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_append_keeps_existing_items() {
        let mut rt = mounted("Todos");
        assert_eq!(root(&rt).item_count(RegionId(0)), 0);

        rt.invoke("add_item", vec![json!("a")]).expect("invoke");
        let first = root(&rt).item_nodes(RegionId(0));
        let created = rt.host().stats().created;

        rt.invoke("add_item", vec![json!("b")]).expect("invoke");
        let items = root(&rt).item_nodes(RegionId(0));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], first[0]);
        assert_eq!(rt.host().stats().created - created, 1);
        assert_eq!(texts(&rt, "li"), vec!["a", "b"]);
        assert_eq!(text(&rt, slot(&rt, 1)), "2");
    }

    #[test]
    fn test_item_handler_sees_its_own_item() {
        let mut rt = mounted("Todos");
        rt.invoke("add_item", vec![json!("a")]).expect("invoke");
        rt.invoke("add_item", vec![json!("b")]).expect("invoke");
        let second = rt.host().find_all("li")[1];
        assert!(click(&mut rt, second));
        assert_eq!(text(&rt, slot(&rt, 2)), "b");
        assert_eq!(root(&rt).field("selected"), Some(&json!("b")));
    }

    #[test]
    fn test_push_inside_let_resyncs_view() {
        let mut rt = mounted("Todos");
        rt.invoke("add_item", vec![json!("a")]).expect("invoke");
        rt.invoke("add_counted", vec![json!("b")]).expect("invoke");
        assert_eq!(root(&rt).item_count(RegionId(0)), 2);
        assert_eq!(texts(&rt, "li"), vec!["a", "b"]);
        assert_eq!(text(&rt, slot(&rt, 1)), "2");
    }

    #[test]
    fn test_reassigning_collection_rebuilds_region() {
        let mut rt = mounted("Todos");
        rt.invoke("add_item", vec![json!("a")]).expect("invoke");
        rt.invoke("add_item", vec![json!("b")]).expect("invoke");
        assert_eq!(rt.context().table(EventKind::Click).len(), 2);

        rt.invoke("reset_items", Vec::new()).expect("invoke");
        assert_eq!(root(&rt).item_count(RegionId(0)), 0);
        assert!(rt.host().find_all("li").is_empty());
        assert!(rt.context().table(EventKind::Click).is_empty());
        assert_eq!(text(&rt, slot(&rt, 1)), "0");
        assert_eq!(rt.host().stats().double_removals, 0);
    }

    #[test]
    fn test_range_resize_keeps_prefix() {
        let mut rt = mounted("Grid");
        assert_eq!(texts(&rt, "span"), vec!["0", "1"]);
        let prefix = root(&rt).item_nodes(RegionId(0));

        rt.invoke("set_rows", vec![json!(4)]).expect("grow");
        let grown = root(&rt).item_nodes(RegionId(0));
        assert_eq!(grown.len(), 4);
        assert_eq!(&grown[..2], &prefix[..]);
        assert_eq!(texts(&rt, "span"), vec!["0", "1", "2", "3"]);

        let removed = rt.host().stats().removed;
        rt.invoke("set_rows", vec![json!(1)]).expect("shrink");
        let shrunk = root(&rt).item_nodes(RegionId(0));
        assert_eq!(shrunk, vec![prefix[0].clone()]);
        assert_eq!(rt.host().stats().removed - removed, 3);
        assert_eq!(texts(&rt, "span"), vec!["0"]);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // PARENT AND CHILD
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_child_write_reaches_owner() {
        let mut rt = mounted("Dashboard");
        assert_eq!(text(&rt, slot(&rt, 1)), "5");
        let stepper = root(&rt).child(ChildId(0)).expect("stepper");
        let button = stepper.node(0).expect("button");
        assert_eq!(text(&rt, button), "5");

        let flushes = rt.host().stats().flushes;
        assert!(click(&mut rt, button));
        assert_eq!(text(&rt, button), "6");
        assert_eq!(text(&rt, slot(&rt, 1)), "6");
        assert_eq!(root(&rt).field("total"), Some(&json!(6)));
        assert_eq!(rt.host().stats().flushes - flushes, 1);
    }

    #[test]
    fn test_owner_write_refreshes_child() {
        let mut rt = mounted("Dashboard");
        rt.invoke("reset_total", Vec::new()).expect("invoke");
        let stepper = root(&rt).child(ChildId(0)).expect("stepper");
        assert_eq!(stepper.field("value"), Some(&json!(0)));
        let button = stepper.node(0).expect("button");
        assert_eq!(text(&rt, button), "0");
        assert_eq!(text(&rt, slot(&rt, 1)), "0");
    }

    #[test]
    fn test_member_change_updates_owner_view() {
        let mut rt = mounted("Dashboard");
        assert_eq!(text(&rt, slot(&rt, 2)), "0");
        rt.invoke("reward", Vec::new()).expect("invoke");
        assert_eq!(text(&rt, slot(&rt, 2)), "1");
        let player = root(&rt).member("player").expect("member");
        assert_eq!(player.field("score"), Some(&json!(1)));
        let span = player.node(0).expect("rendered member");
        assert_eq!(text(&rt, span), "1");
    }

    #[test]
    fn test_callback_prop_runs_owner_method() {
        let mut rt = mounted("Editor");
        let toolbar = root(&rt).child(ChildId(0)).expect("toolbar");
        let button = toolbar.node(0).expect("button");
        assert!(click(&mut rt, button));
        assert!(click(&mut rt, button));
        assert_eq!(text(&rt, slot(&rt, 0)), "2");
    }

    #[test]
    fn test_item_child_callback_runs_owner_method() {
        let mut rt = mounted("Shelf");
        assert_eq!(texts(&rt, "p"), vec!["0", "-1"]);
        let buttons = rt.host().find_all("button");
        assert_eq!(buttons.len(), 5);

        assert!(click(&mut rt, buttons[1]));
        assert_eq!(root(&rt).field("saves"), Some(&json!(1)));
        assert!(click(&mut rt, buttons[4]));
        assert_eq!(root(&rt).field("picked"), Some(&json!(2)));
        assert!(click(&mut rt, buttons[2]));
        assert_eq!(texts(&rt, "p"), vec!["1", "0"]);
        assert_eq!(rt.context().depth(), 0);
    }

    #[test]
    fn test_item_child_reference_write_reaches_owner() {
        let mut rt = mounted("Ledger");
        assert_eq!(texts(&rt, "p"), vec!["5"]);
        let steppers = root(&rt).item_children(RegionId(0));
        assert_eq!(steppers.len(), 2);
        let button = steppers[1].node(0).expect("button");

        assert!(click(&mut rt, button));
        assert_eq!(text(&rt, button), "6");
        assert_eq!(root(&rt).field("total"), Some(&json!(6)));
        assert_eq!(texts(&rt, "p"), vec!["6"]);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_tick_reaches_field_and_item_children() {
        let mut rt = mounted("Wall");
        assert_eq!(texts(&rt, "p"), vec!["0", "0", "0"]);

        let flushes = rt.host().stats().flushes;
        rt.tick(0.5).expect("tick");
        assert_eq!(rt.host().stats().flushes - flushes, 1);
        assert_eq!(texts(&rt, "p"), vec!["1", "1", "1"]);
        let clock = root(&rt).child(ChildId(0)).expect("clock");
        assert_eq!(clock.field("last"), Some(&json!(0.5)));

        rt.tick(0.25).expect("tick");
        assert_eq!(texts(&rt, "p"), vec!["2", "2", "2"]);
        for clock in root(&rt).item_children(RegionId(0)) {
            assert_eq!(clock.field("frames"), Some(&json!(2)));
            assert_eq!(clock.field("last"), Some(&json!(0.25)));
        }
    }

    #[test]
    fn test_tick_reaches_members() {
        let mut rt = mounted("Tower");
        rt.tick(1.0).expect("tick");
        let clock = root(&rt).member("clock").expect("member");
        assert_eq!(clock.field("frames"), Some(&json!(1)));
        assert_eq!(texts(&rt, "p"), vec!["1"]);
    }

    #[test]
    fn test_tick_on_a_quiet_root_changes_nothing() {
        let mut rt = mounted("Counter");
        rt.tick(1.0).expect("tick");
        assert_eq!(root(&rt).field("count"), Some(&json!(0)));
        assert_eq!(rt.context().depth(), 0);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // ROUTER
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_router_mounts_initial_route() {
        let rt = mounted("App");
        assert_eq!(root(&rt).current_route(), Some("/"));
        assert_eq!(root(&rt).route_child().map(Instance::name), Some("Home"));
        assert_eq!(texts(&rt, "h1"), vec!["Home"]);
        assert!(rt.host().history().is_empty());
    }

    #[test]
    fn test_navigate_swaps_route_child() {
        let mut rt = mounted("App");
        rt.navigate("/about").expect("navigate");
        assert_eq!(root(&rt).route_child().map(Instance::name), Some("About"));
        assert_eq!(texts(&rt, "h1"), vec!["About"]);
        assert_eq!(rt.host().history(), &["/about".to_string()]);

        rt.navigate("/nowhere").expect("navigate");
        assert_eq!(root(&rt).current_route(), Some("/nowhere"));
        assert_eq!(root(&rt).route_child().map(Instance::name), Some("Home"));
        assert_eq!(texts(&rt, "h1"), vec!["Home"]);
        assert_eq!(rt.host().stats().double_removals, 0);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // ERRORS AND LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_failed_action_resets_depth() {
        let mut rt = mounted("Counter");
        let err = rt.invoke("missing", Vec::new()).unwrap_err();
        assert_eq!(
            err,
            RuntimeError::UnknownMethod {
                component: "Counter".into(),
                method: "missing".into()
            }
        );
        assert_eq!(rt.context().depth(), 0);

        let button = slot(&rt, 0);
        let flushes = rt.host().stats().flushes;
        assert!(click(&mut rt, button));
        assert_eq!(rt.host().stats().flushes - flushes, 1);
    }

    #[test]
    fn test_actions_require_a_mounted_root() {
        let mut rt = runtime();
        assert_eq!(
            rt.invoke("increment", Vec::new()).unwrap_err(),
            RuntimeError::NotMounted
        );
        let root = rt.host().root();
        assert_eq!(
            rt.mount("Nope", Vec::new(), root).unwrap_err(),
            RuntimeError::UnknownComponent("Nope".into())
        );
    }

    #[test]
    fn test_destroy_clears_tree_and_listeners() {
        let mut rt = mounted("Scoreboard");
        rt.destroy();
        let root = rt.host().root();
        assert!(rt.host().children(root).is_empty());
        assert_eq!(rt.context().registrations(), 0);
        assert!(rt.root().is_none());
        assert_eq!(rt.host().stats().double_removals, 0);
    }

    #[test]
    fn test_mount_props_seed_params() {
        let mut rt = runtime();
        let root = rt.host().root();
        rt.mount("Stepper", vec![("value".into(), json!(41))], root)
            .expect("mounts");
        let button = slot(&rt, 0);
        assert!(click(&mut rt, button));
        assert_eq!(text(&rt, button), "42");
    }
}
