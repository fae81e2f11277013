#[cfg(test)]
mod tests {
    use crate::ast::{AssignOp, Component, Expr, Stmt};
    use crate::codegen::emit_component;
    use crate::compile::compile_component;
    use crate::config::CompileOptions;
    use crate::fixtures::{self, element, expr, method, state, text};

    fn js(component: Component) -> String {
        let plan = compile_component(&component, &fixtures::registry(), &CompileOptions::default())
            .expect("fixture compiles");
        plan.js.expect("emit_js is on by default")
    }

    /// Source text of `name() {` up to the closing brace at the same indent.
    fn body_of<'a>(js: &'a str, header: &str) -> &'a str {
        let start = js.find(header).unwrap_or_else(|| panic!("missing {}", header));
        let rest = &js[start..];
        let end = rest.find("\n  }\n").map(|i| i + 4).unwrap_or(rest.len());
        &rest[..end]
    }

    fn position(haystack: &str, needle: &str) -> usize {
        haystack
            .find(needle)
            .unwrap_or_else(|| panic!("missing {:?} in\n{}", needle, haystack))
    }

    #[test]
    fn test_counter_class_shape() {
        let out = js(fixtures::counter());
        assert!(out.starts_with("import { rt } from \"@reactive/runtime\";"));
        assert!(out.contains("export class Counter {"));
        assert!(out.contains("static CLICK_MASK = 0x1n;"));
        assert!(out.contains("_update_el0_text() {"));
        assert!(out.contains("rt.setText(node, String(this.count));"));
        assert!(out.contains("_dispatch_click(i, event) {"));
        assert!(out.contains("case 0: this.increment(); break;"));

        let increment = body_of(&out, "  increment() {");
        assert!(increment.contains("this.count += 1;"));
        assert!(increment.contains("this._update_el0_text();"));
    }

    #[test]
    fn test_mask_literal_lists_handler_slots() {
        let out = js(fixtures::scoreboard());
        assert!(out.contains("static CLICK_MASK = 0x28n;"));
        assert!(out.contains("if (Scoreboard.CLICK_MASK & bit)"));
        assert!(!out.contains("INPUT_MASK"));
    }

    #[test]
    fn test_branch_procedure_is_guarded() {
        let mut c = fixtures::component("Notice");
        c.state.push(state("open", "bool", Some(Expr::boolean(true))));
        c.state.push(state("label", "string", Some(Expr::str("hi"))));
        c.view = vec![fixtures::conditional(
            Expr::ident("open"),
            vec![element("p", vec![], vec![expr(Expr::ident("label"))])],
            vec![text("closed")],
        )];
        let out = js(c);
        let procedure = body_of(&out, "  _update_el0_text() {");
        assert!(procedure.contains("if (this._if_0_state !== true) return;"));
        assert!(out.contains("_sync_if_0() {"));
        assert!(out.contains("_teardown_if_0() {"));
    }

    #[test]
    fn test_epilogue_phases_emit_in_order() {
        let mut c = fixtures::component("Meter");
        let mut level = state("level", "int", Some(Expr::int(0)));
        level.public = true;
        c.state.push(level);
        c.methods.push(method(
            "raise",
            &[],
            vec![Stmt::assign("level", AssignOp::Add, Expr::int(1))],
        ));
        c.view = vec![
            element("p", vec![], vec![expr(Expr::ident("level"))]),
            fixtures::child("Stepper", vec![fixtures::ref_prop("value", "level")]),
            fixtures::conditional(
                Expr::binary(crate::ast::BinaryOp::Gt, Expr::ident("level"), Expr::int(3)),
                vec![text("high")],
                vec![],
            ),
            fixtures::range_loop(
                "i",
                Expr::int(0),
                Expr::ident("level"),
                vec![element("i", vec![], vec![])],
            ),
        ];
        let out = js(c);
        let raise = body_of(&out, "  raise() {");
        let update = position(raise, "this._update_el0_text();");
        let refresh = position(raise, "this._child_0._update_value();");
        let conditional = position(raise, "this._sync_if_0();");
        let repetition = position(raise, "this._sync_loop_1();");
        let notify = position(raise, "if (this.onLevelChange) this.onLevelChange();");
        assert!(update < refresh);
        assert!(refresh < conditional);
        assert!(conditional < repetition);
        assert!(repetition < notify);
    }

    #[test]
    fn test_single_append_emits_patch_instead_of_resync() {
        let out = js(fixtures::todos());
        let add = body_of(&out, "  add_item(text) {");
        assert!(add.contains("this.items.push(text);"));
        assert!(add.contains("this._append_loop_0();"));
        assert!(!add.contains("this._sync_loop_0();"));
        assert!(out.contains("_append_loop_0() {"));

        let reset = body_of(&out, "  reset_items() {");
        assert!(reset.contains("this._sync_loop_0();"));
    }

    #[test]
    fn test_method_callback_props_become_closures() {
        let out = js(fixtures::editor());
        assert!(out.contains("this._child_0 = new Toolbar(this.ctx, { onSave: () => this.save() });"));

        let out = js(fixtures::shelf());
        assert!(out.contains("const child = new Toolbar(this.ctx, { onSave: () => this.save() });"));
        assert!(out.contains("const child = new Toolbar(this.ctx, { onSave: () => this.pick(j) });"));
    }

    #[test]
    fn test_loop_resync_rebinds_before_closing() {
        let out = js(fixtures::grid());
        let sync = body_of(&out, "  _sync_loop_0() {");
        assert!(position(sync, "this._rebind();") < position(sync, "this.ctx.end();"));
    }

    #[test]
    fn test_item_child_wire_is_set_before_render() {
        let out = js(fixtures::ledger());
        let create = body_of(&out, "  _create_loop_0_item(i) {");
        let wire = position(create, "child.onValueChange = () => {");
        assert!(wire < position(create, "child.render("));
    }

    #[test]
    fn test_tick_wraps_user_method_and_forwards() {
        let out = js(fixtures::clock());
        assert!(out.contains("  _user_tick(dt) {"));
        let tick = body_of(&out, "  tick(dt) {");
        assert!(tick.contains("this._user_tick(dt);"));
        assert!(tick.contains("this.ctx.end();"));

        let out = js(fixtures::wall());
        let tick = body_of(&out, "  tick(dt) {");
        assert!(!tick.contains("_user_tick"));
        assert!(tick.contains("if (this._child_0 !== null) this._child_0.tick(dt);"));
        assert!(tick.contains(
            "for (const item of this._loop_0_items) for (const child of item.children) child.tick?.(dt);"
        ));

        let out = js(fixtures::tower());
        assert!(body_of(&out, "  tick(dt) {").contains("this.clock?.tick(dt);"));

        assert!(!js(fixtures::counter()).contains("tick(dt)"));
    }

    #[test]
    fn test_owner_refreshes_child_and_installs_wires() {
        let out = js(fixtures::dashboard());
        let reset = body_of(&out, "  reset_total() {");
        assert!(reset.contains("if (this._child_0 !== null) this._child_0._update_value();"));

        let rebind = body_of(&out, "  _rebind() {");
        assert!(rebind.contains("if (this._child_0 !== null) this._child_0.onValueChange = () => {"));
        assert!(rebind.contains("if (this.player !== null) this.player.onScoreChange = () => {"));
    }

    #[test]
    fn test_reference_param_reads_through_accessor() {
        let out = js(fixtures::stepper());
        assert!(out.contains("rt.setText(node, String(this.value.value));"));
        assert!(out.contains("_update_value() {"));
        let bump = body_of(&out, "  bump() {");
        assert!(bump.contains("if (this.onValueChange) this.onValueChange();"));
    }

    #[test]
    fn test_return_with_epilogue_uses_finally() {
        let mut c = fixtures::counter();
        c.methods.push(method(
            "bump_and_read",
            &[],
            vec![
                Stmt::assign("count", AssignOp::Add, Expr::int(1)),
                Stmt::Return {
                    value: Some(Expr::ident("count")),
                },
            ],
        ));
        let out = js(c);
        let body = body_of(&out, "  bump_and_read() {");
        let ret = position(body, "return this.count;");
        let finally = position(body, "} finally {");
        let update = position(body, "this._update_el0_text();");
        assert!(ret < finally);
        assert!(finally < update);
    }

    #[test]
    fn test_disabled_emission_leaves_no_source() {
        let options = CompileOptions {
            emit_js: false,
            ..CompileOptions::default()
        };
        let plan = compile_component(&fixtures::counter(), &fixtures::registry(), &options)
            .expect("compiles");
        assert!(plan.js.is_none());
        assert_eq!(plan.procedures.len(), 1);

        let out = emit_component(&plan, "./rt.js");
        assert!(out.starts_with("import { rt } from \"./rt.js\";"));
    }
}
