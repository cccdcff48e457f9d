//! Simple tests for "this lambda creates this SQL" go here.

use insta::assert_snapshot;
use similar_asserts::assert_eq;

use crate::{
    define_delete_with, define_insert_with, define_select_with, define_update_with, delete,
    insert, to_sql, update, ColumnType, DefineOptions, Dialect, Params, Schema, Statement, ToSql,
};

fn schema() -> Schema {
    use ColumnType::*;
    Schema::new()
        .table(
            "users",
            [
                ("id", Int),
                ("name", Text),
                ("email", Text),
                ("age", Int),
                ("is_active", Bool),
                ("department_id", Int),
                ("salary", Float),
            ],
        )
        .table(
            "orders",
            [("id", Int), ("user_id", Int), ("total_amount", Float)],
        )
        .table("departments", [("id", Int), ("name", Text)])
        .table("events", [("id", Int), ("payload", Json)])
}

// The cache is exercised by its own tests; bypassing it here keeps these
// tests independent of process-wide cache state.
const NO_CACHE: DefineOptions = DefineOptions { cache: false };

fn compile_with(dialect: Dialect, source: &str, runtime: Params) -> Statement {
    let plan = define_select_with(&schema(), dialect, source, &NO_CACHE).unwrap();
    to_sql(&plan, &runtime).unwrap()
}

fn compile(source: &str) -> Statement {
    compile_with(Dialect::Postgres, source, Params::new())
}

fn compile_err(source: &str, runtime: Params) -> String {
    let result = define_select_with(&schema(), Dialect::Postgres, source, &NO_CACHE)
        .and_then(|plan| to_sql(&plan, &runtime));
    result.unwrap_err().to_string()
}

#[test]
fn test_select_star() {
    assert_snapshot!(
        compile("(q) => q.from('users')").sql,
        @r###"SELECT * FROM "users""###
    );
}

#[test]
fn test_null_safe_filter() {
    let stmt = compile_with(
        Dialect::Postgres,
        r#"(q, p) => q.from("users").where(u => u.age != null && u.age > p.min)"#,
        Params::new().set("min", 40),
    );
    assert_snapshot!(
        stmt.sql,
        @r###"SELECT * FROM "users" WHERE ("age" IS NOT NULL AND "age" > $(min))"###
    );
    assert_eq!(stmt.params, Params::new().set("min", 40));
}

#[test]
fn test_auto_param_ordering() {
    let stmt = compile(
        r#"(q) => q.from("users").where(u => u.age >= 18 && u.name == "John" && u.is_active == true && u.email != null)"#,
    );
    assert_snapshot!(
        stmt.sql,
        @r###"SELECT * FROM "users" WHERE ("age" >= $(__p1) AND "name" = $(__p2) AND "is_active" = $(__p3) AND "email" IS NOT NULL)"###
    );
    // Literal order in the source is parameter order; null never lifts.
    assert_eq!(
        stmt.params,
        Params::new().set("__p1", 18).set("__p2", "John").set("__p3", true)
    );
}

#[test]
fn test_auto_param_info_records_column_context() {
    let plan = define_select_with(
        &schema(),
        Dialect::Postgres,
        r#"(q) => q.from("users").where(u => u.age >= 18)"#,
        &NO_CACHE,
    )
    .unwrap();

    let info = &plan.param_info()["__p1"];
    insta::assert_yaml_snapshot!(info, @r###"
    ---
    value: 18
    field_name: age
    table_name: users
    "###);
}

#[test]
fn test_join_with_aliases_and_paging() {
    let stmt = compile_with(
        Dialect::Postgres,
        r#"(q, p) => q.from("orders")
            .join(q.from("users"), o => o.user_id, u => u.id,
                  (o, u) => ({ orderId: o.id, userName: u.name, orderTotal: o.total_amount }))
            .skip(p.offset).take(p.pageSize)"#,
        Params::new().set("offset", 3).set("pageSize", 3),
    );
    assert_snapshot!(
        stmt.sql,
        @r###"SELECT "t0"."id" AS "orderId", "t1"."name" AS "userName", "t0"."total_amount" AS "orderTotal" FROM "orders" AS "t0" INNER JOIN "users" AS "t1" ON "t0"."user_id" = "t1"."id" LIMIT $(pageSize) OFFSET $(offset)"###
    );
}

#[test]
fn test_join_shape_resolves_through_later_select() {
    assert_snapshot!(
        compile(
            r#"(q) => q.from("orders")
                .join(q.from("users"), o => o.user_id, u => u.id, (o, u) => ({ o, u }))
                .select(j => ({ orderId: j.o.id, userName: j.u.name }))"#,
        ).sql,
        @r###"SELECT "t0"."id" AS "orderId", "t1"."name" AS "userName" FROM "orders" AS "t0" INNER JOIN "users" AS "t1" ON "t0"."user_id" = "t1"."id""###
    );
}

#[test]
fn test_join_spread_projects_star_of_side() {
    assert_snapshot!(
        compile(
            r#"(q) => q.from("orders")
                .join(q.from("users"), o => o.user_id, u => u.id,
                      (o, u) => ({ ...o, userName: u.name }))"#,
        ).sql,
        @r###"SELECT "t0".*, "t1"."name" AS "userName" FROM "orders" AS "t0" INNER JOIN "users" AS "t1" ON "t0"."user_id" = "t1"."id""###
    );
}

#[test]
fn test_two_joins_chain_aliases_in_discovery_order() {
    assert_snapshot!(
        compile(
            r#"(q) => q.from("orders")
                .join(q.from("users"), o => o.user_id, u => u.id, (o, u) => ({ o, u }))
                .join(q.from("departments"), j => j.u.department_id, d => d.id,
                      (j, d) => ({ orderId: j.o.id, deptName: d.name }))"#,
        ).sql,
        @r###"SELECT "t0"."id" AS "orderId", "t2"."name" AS "deptName" FROM "orders" AS "t0" INNER JOIN "users" AS "t1" ON "t0"."user_id" = "t1"."id" INNER JOIN "departments" AS "t2" ON "t1"."department_id" = "t2"."id""###
    );
}

#[test]
fn test_left_join() {
    assert_snapshot!(
        compile(
            r#"(q) => q.from("users")
                .leftJoin(q.from("orders"), u => u.id, o => o.user_id,
                          (u, o) => ({ name: u.name, total: o.total_amount }))"#,
        ).sql,
        @r###"SELECT "t0"."name" AS "name", "t1"."total_amount" AS "total" FROM "users" AS "t0" LEFT JOIN "orders" AS "t1" ON "t0"."id" = "t1"."user_id""###
    );
}

#[test]
fn test_window_filter_wraps_projection_into_subquery() {
    let stmt = compile(
        r#"(q, p, h) => q.from("users")
            .select(u => ({ ...u, rn: h.window(u).partitionBy(r => r.department_id).orderByDescending(r => r.salary).rowNumber() }))
            .where(r => r.rn === 1 && r.department_id !== null)"#,
    );
    assert_snapshot!(
        stmt.sql,
        @r###"SELECT * FROM (SELECT *, ROW_NUMBER() OVER (PARTITION BY "department_id" ORDER BY "salary" DESC) AS "rn" FROM "users") AS "w0" WHERE ("rn" = $(__p1) AND "department_id" IS NOT NULL)"###
    );
    assert_eq!(stmt.params, Params::new().set("__p1", 1));
}

#[test]
fn test_window_rank_without_partition() {
    assert_snapshot!(
        compile(
            r#"(q, p, h) => q.from("users")
                .select(u => ({ name: u.name, r: h.window(u).orderBy(x => x.salary).rank() }))"#,
        ).sql,
        @r###"SELECT "name" AS "name", RANK() OVER (ORDER BY "salary" ASC) AS "r" FROM "users""###
    );
}

#[test]
fn test_terminal_any_emits_exists_case() {
    let stmt = compile(r#"(q) => q.from("users").any(u => u.age != null && u.age < 30)"#);
    assert_snapshot!(
        stmt.sql,
        @r###"SELECT CASE WHEN EXISTS(SELECT 1 FROM "users" WHERE ("age" IS NOT NULL AND "age" < $(__p1))) THEN 1 ELSE 0 END"###
    );
    assert_eq!(stmt.params, Params::new().set("__p1", 30));
}

#[test]
fn test_terminal_all_emits_double_negation() {
    assert_snapshot!(
        compile(r#"(q) => q.from("users").all(u => u.age >= 18)"#).sql,
        @r###"SELECT CASE WHEN NOT EXISTS(SELECT 1 FROM "users" WHERE NOT ("age" >= $(__p1))) THEN 1 ELSE 0 END"###
    );
}

#[test]
fn test_injection_stays_in_params() {
    let malicious = "'; DROP TABLE users; --";
    let stmt = compile_with(
        Dialect::Postgres,
        r#"(q, p) => q.from("users").where(u => u.name == p.maliciousName)"#,
        Params::new().set("maliciousName", malicious),
    );
    assert_snapshot!(stmt.sql, @r###"SELECT * FROM "users" WHERE "name" = $(maliciousName)"###);
    assert!(!stmt.sql.contains('\''));
    assert_eq!(
        stmt.params.get("maliciousName"),
        Some(&crate::ParamValue::String(malicious.to_string()))
    );
}

#[test]
fn test_stacked_wheres_join_with_flat_and() {
    assert_snapshot!(
        compile(r#"(q) => q.from("users").where(u => u.age >= 18).where(u => u.is_active)"#).sql,
        @r###"SELECT * FROM "users" WHERE "age" >= $(__p1) AND "is_active""###
    );
}

#[test]
fn test_precedence_is_stable_across_phrasings() {
    let spelled = compile(
        r#"(q) => q.from("users").where(u => u.age > 21 && (u.is_active || u.email != null))"#,
    );
    let parenthesized = compile(
        r#"(q) => q.from("users").where(u => ((u.age > 21)) && ((u.is_active) || ((u.email) != null)))"#,
    );
    assert_eq!(spelled.sql, parenthesized.sql);
    assert_snapshot!(
        spelled.sql,
        @r###"SELECT * FROM "users" WHERE ("age" > $(__p1) AND ("is_active" OR "email" IS NOT NULL))"###
    );
}

#[test]
fn test_not_parenthesizes_composite_operand() {
    assert_snapshot!(
        compile(r#"(q) => q.from("users").where(u => !(u.age > 21) && !u.is_active)"#).sql,
        @r###"SELECT * FROM "users" WHERE (NOT ("age" > $(__p1)) AND NOT "is_active")"###
    );
}

#[test]
fn test_order_by_then_by() {
    assert_snapshot!(
        compile(r#"(q) => q.from("users").orderBy(u => u.name).thenByDescending(u => u.age)"#).sql,
        @r###"SELECT * FROM "users" ORDER BY "name" ASC, "age" DESC"###
    );
}

#[test]
fn test_reverse_flips_ordering() {
    assert_snapshot!(
        compile(r#"(q) => q.from("users").orderBy(u => u.name).reverse()"#).sql,
        @r###"SELECT * FROM "users" ORDER BY "name" DESC"###
    );
}

#[test]
fn test_first_and_single_limits() {
    assert_snapshot!(
        compile(r#"(q) => q.from("users").where(u => u.is_active).first()"#).sql,
        @r###"SELECT * FROM "users" WHERE "is_active" LIMIT 1"###
    );
    // Two rows, so the caller can detect unexpected multiplicity.
    assert_snapshot!(
        compile(r#"(q) => q.from("users").singleOrDefault(u => u.id == 1)"#).sql,
        @r###"SELECT * FROM "users" WHERE "id" = $(__p1) LIMIT 2"###
    );
}

#[test]
fn test_last_without_order_falls_back() {
    assert_snapshot!(
        compile(r#"(q) => q.from("users").last()"#).sql,
        @r###"SELECT * FROM "users" ORDER BY 1 DESC LIMIT 1"###
    );
    assert_snapshot!(
        compile(r#"(q) => q.from("users").orderBy(u => u.age).last()"#).sql,
        @r###"SELECT * FROM "users" ORDER BY "age" DESC LIMIT 1"###
    );
}

#[test]
fn test_group_by_with_aggregates() {
    assert_snapshot!(
        compile(
            r#"(q) => q.from("users").groupBy(u => u.department_id)
                .select(g => ({ department: g.key, headcount: g.count(), top: g.max(x => x.salary) }))"#,
        ).sql,
        @r###"SELECT "department_id" AS "department", COUNT(*) AS "headcount", MAX("salary") AS "top" FROM "users" GROUP BY "department_id""###
    );
}

#[test]
fn test_scalar_terminals() {
    assert_snapshot!(
        compile(r#"(q) => q.from("users").count(u => u.is_active)"#).sql,
        @r###"SELECT COUNT(*) FROM "users" WHERE "is_active""###
    );
    assert_snapshot!(
        compile(r#"(q) => q.from("users").sum(u => u.salary)"#).sql,
        @r###"SELECT SUM("salary") FROM "users""###
    );
    assert_snapshot!(
        compile(r#"(q) => q.from("users").select(u => u.age).average()"#).sql,
        @r###"SELECT AVG("age") FROM "users""###
    );
}

#[test]
fn test_contains_over_value_projection() {
    assert_snapshot!(
        compile(r#"(q) => q.from("users").select(u => u.id).contains(7)"#).sql,
        @r###"SELECT CASE WHEN EXISTS(SELECT 1 FROM "users" WHERE "id" = $(__p1)) THEN 1 ELSE 0 END"###
    );
}

#[test]
fn test_distinct() {
    assert_snapshot!(
        compile(r#"(q) => q.from("users").select(u => u.department_id).distinct()"#).sql,
        @r###"SELECT DISTINCT "department_id" FROM "users""###
    );
}

#[test]
fn test_string_methods_lower_to_like() {
    assert_snapshot!(
        compile(r#"(q, p) => q.from("users").where(u => u.name.startsWith(p.prefix))"#).sql,
        @r###"SELECT * FROM "users" WHERE "name" LIKE $(prefix) || '%'"###
    );
    assert_snapshot!(
        compile(r#"(q, p) => q.from("users").where(u => u.email.endsWith(p.domain))"#).sql,
        @r###"SELECT * FROM "users" WHERE "email" LIKE '%' || $(domain)"###
    );
    assert_snapshot!(
        compile(r#"(q, p) => q.from("users").where(u => u.name.includes(p.fragment))"#).sql,
        @r###"SELECT * FROM "users" WHERE "name" LIKE '%' || $(fragment) || '%'"###
    );
}

#[test]
fn test_includes_on_lists_lowers_to_in() {
    let stmt = compile(r#"(q) => q.from("users").where(u => [1, 2, 3].includes(u.id))"#);
    assert_snapshot!(
        stmt.sql,
        @r###"SELECT * FROM "users" WHERE "id" IN ($(__p1), $(__p2), $(__p3))"###
    );
    assert_eq!(
        stmt.params,
        Params::new().set("__p1", 1).set("__p2", 2).set("__p3", 3)
    );

    assert_snapshot!(
        compile(r#"(q, p) => q.from("users").where(u => p.ids.includes(u.id))"#).sql,
        @r###"SELECT * FROM "users" WHERE "id" IN ($(ids))"###
    );
}

#[test]
fn test_case_insensitive_helpers() {
    assert_snapshot!(
        compile(r#"(q, p, h) => q.from("users").where(u => h.functions.iequals(u.name, p.name))"#).sql,
        @r###"SELECT * FROM "users" WHERE LOWER("name") = LOWER($(name))"###
    );
    assert_snapshot!(
        compile(r#"(q, p, h) => q.from("users").where(u => h.functions.istartsWith(u.name, p.prefix))"#).sql,
        @r###"SELECT * FROM "users" WHERE LOWER("name") LIKE LOWER($(prefix)) || '%'"###
    );
}

#[test]
fn test_optional_filter_pattern() {
    assert_snapshot!(
        compile(r#"(q, p) => q.from("users").where(u => p.search == undefined || u.name == p.search)"#).sql,
        @r###"SELECT * FROM "users" WHERE ($(search) IS NULL OR "name" = $(search))"###
    );
}

#[test]
fn test_coalesce_forms() {
    assert_snapshot!(
        compile(r#"(q) => q.from("users").select(u => ({ label: u.name ?? "unknown" }))"#).sql,
        @r###"SELECT COALESCE("name", $(__p1)) AS "label" FROM "users""###
    );
    // `||` over a non-boolean left side is the optional-default pattern.
    assert_snapshot!(
        compile(r#"(q) => q.from("users").select(u => ({ label: u.name || "unknown" }))"#).sql,
        @r###"SELECT COALESCE("name", $(__p1)) AS "label" FROM "users""###
    );
}

#[test]
fn test_conditional_projection() {
    assert_snapshot!(
        compile(r#"(q) => q.from("users").select(u => ({ band: u.age >= 65 ? "senior" : "active" }))"#).sql,
        @r###"SELECT CASE WHEN "age" >= $(__p1) THEN $(__p2) ELSE $(__p3) END AS "band" FROM "users""###
    );
}

#[test]
fn test_arithmetic_precedence_parenthesization() {
    assert_snapshot!(
        compile(r#"(q) => q.from("users").select(u => ({ v: (u.age + 1) * 2 }))"#).sql,
        @r###"SELECT ("age" + $(__p1)) * $(__p2) AS "v" FROM "users""###
    );
    assert_snapshot!(
        compile(r#"(q) => q.from("users").select(u => ({ v: u.age + 1 * 2 }))"#).sql,
        @r###"SELECT "age" + $(__p1) * $(__p2) AS "v" FROM "users""###
    );
}

#[test]
fn test_string_concat_uses_dialect_operator() {
    assert_snapshot!(
        compile(r#"(q) => q.from("users").select(u => ({ tag: u.name + "!" }))"#).sql,
        @r###"SELECT "name" || $(__p1) AS "tag" FROM "users""###
    );
    let mysql = define_select_with(
        &schema(),
        Dialect::MySql,
        r#"(q) => q.from("users").select(u => ({ tag: u.name + "!" }))"#,
        &NO_CACHE,
    )
    .unwrap()
    .to_sql(&Params::new())
    .unwrap();
    assert_snapshot!(mysql.sql, @r###"SELECT CONCAT(`name`, @__p1) AS `tag` FROM `users`"###);
}

#[test]
fn test_json_column_paths_stay_dotted() {
    assert_snapshot!(
        compile(r#"(q) => q.from("events").where(e => e.payload.kind == "click")"#).sql,
        @r###"SELECT * FROM "events" WHERE "payload.kind" = $(__p1)"###
    );
}

#[test]
fn test_sqlite_dialect_placeholders_and_offset() {
    let stmt = compile_with(
        Dialect::Sqlite,
        r#"(q) => q.from("users").where(u => u.name.startsWith("Jo")).skip(2)"#,
        Params::new(),
    );
    assert_snapshot!(
        stmt.sql,
        @r###"SELECT * FROM "users" WHERE "name" LIKE @__p1 || '%' LIMIT -1 OFFSET @__p2"###
    );
}

#[test]
fn test_ansi_dialect_fetch_syntax() {
    let stmt = compile_with(
        Dialect::Ansi,
        r#"(q, p) => q.from("users").skip(p.offset).take(p.pageSize)"#,
        Params::new(),
    );
    assert_snapshot!(
        stmt.sql,
        @r###"SELECT * FROM "users" OFFSET $(offset) ROWS FETCH NEXT $(pageSize) ROWS ONLY"###
    );
}

#[test]
fn test_insert_with_returning() {
    let plan = define_insert_with(
        &schema(),
        Dialect::Postgres,
        r#"(q, p) => q.insertInto("users").values({ name: p.name, age: 30, is_active: true }).returning(u => ({ id: u.id }))"#,
        &NO_CACHE,
    )
    .unwrap();
    let stmt = plan.to_sql(&Params::new().set("name", "Ada")).unwrap();
    assert_snapshot!(
        stmt.sql,
        @r###"INSERT INTO "users" ("name", "age", "is_active") VALUES ($(name), $(__p1), $(__p2)) RETURNING "id" AS "id""###
    );
    assert_eq!(
        stmt.params,
        Params::new().set("name", "Ada").set("__p1", 30).set("__p2", true)
    );
}

#[test]
fn test_update_lambda_form() {
    let plan = define_update_with(
        &schema(),
        Dialect::Postgres,
        r#"(q, p) => q.update("users").set(u => ({ age: u.age + 1, name: p.name })).where(u => u.id == p.id)"#,
        &NO_CACHE,
    )
    .unwrap();
    assert_snapshot!(
        plan.to_sql(&Params::new()).unwrap().sql,
        @r###"UPDATE "users" SET "age" = "age" + $(__p1), "name" = $(name) WHERE "id" = $(id)"###
    );
}

#[test]
fn test_update_without_where_is_guarded() {
    let plan = define_update_with(
        &schema(),
        Dialect::Postgres,
        r#"(q) => q.update("users").set(u => ({ is_active: false }))"#,
        &NO_CACHE,
    )
    .unwrap();
    let err = plan.to_sql(&Params::new()).unwrap_err().to_string();
    assert!(err.contains("allowFullTableUpdate"), "unexpected error: {err}");

    let allowed = define_update_with(
        &schema(),
        Dialect::Postgres,
        r#"(q) => q.update("users").set(u => ({ is_active: false })).allowFullTableUpdate()"#,
        &NO_CACHE,
    )
    .unwrap();
    assert_snapshot!(
        allowed.to_sql(&Params::new()).unwrap().sql,
        @r###"UPDATE "users" SET "is_active" = $(__p1)"###
    );
}

#[test]
fn test_delete_lambda_form() {
    let plan = define_delete_with(
        &schema(),
        Dialect::Postgres,
        r#"(q, p) => q.deleteFrom("users").where(u => u.id == p.id)"#,
        &NO_CACHE,
    )
    .unwrap();
    assert_snapshot!(
        plan.to_sql(&Params::new()).unwrap().sql,
        @r###"DELETE FROM "users" WHERE "id" = $(id)"###
    );

    let guarded = define_delete_with(
        &schema(),
        Dialect::Postgres,
        r#"(q) => q.deleteFrom("users")"#,
        &NO_CACHE,
    )
    .unwrap();
    let err = guarded.to_sql(&Params::new()).unwrap_err().to_string();
    assert!(err.contains("allowFullTableDelete"), "unexpected error: {err}");
}

#[test]
fn test_staged_update_builder() {
    let builder = update(&schema(), Dialect::Postgres, "users").unwrap();
    let plan = builder
        .set("(u, p) => ({ name: p.newName, is_active: true })")
        .unwrap()
        .filter("(u, p) => u.id == p.id")
        .unwrap();

    let stmt = plan
        .to_sql(&Params::new().set("newName", "Grace").set("id", 7))
        .unwrap();
    assert_snapshot!(
        stmt.sql,
        @r###"UPDATE "users" SET "name" = $(newName), "is_active" = $(__p1) WHERE "id" = $(id)"###
    );
    // The filter stage resumed numbering after the set stage's literal.
    assert_eq!(stmt.params.get("__p1"), Some(&crate::ParamValue::Bool(true)));
}

#[test]
fn test_staged_builder_stages_are_pure_values() {
    let with_set = update(&schema(), Dialect::Postgres, "users")
        .unwrap()
        .set("(u) => ({ is_active: false })")
        .unwrap();

    // Branching from one stage twice must not share auto-param state.
    let a = with_set.filter("(u, p) => u.age > 30").unwrap();
    let b = with_set.filter("(u, p) => u.age > 40").unwrap();

    let a = a.to_sql(&Params::new()).unwrap();
    let b = b.to_sql(&Params::new()).unwrap();
    assert_eq!(a.sql, b.sql);
    assert_eq!(a.params.get("__p2"), Some(&crate::ParamValue::Int(30)));
    assert_eq!(b.params.get("__p2"), Some(&crate::ParamValue::Int(40)));
}

#[test]
fn test_staged_insert_and_delete_builders() {
    let stmt = insert(&schema(), Dialect::Sqlite, "users")
        .unwrap()
        .values("(p) => ({ name: p.name, age: 30 })")
        .unwrap()
        .returning("(u) => u.id")
        .unwrap()
        .to_sql(&Params::new().set("name", "Ada"))
        .unwrap();
    assert_snapshot!(
        stmt.sql,
        @r###"INSERT INTO "users" ("name", "age") VALUES (@name, @__p1) RETURNING "id""###
    );

    let stmt = delete(&schema(), Dialect::Postgres, "users")
        .unwrap()
        .allow_full_table_delete()
        .to_sql(&Params::new())
        .unwrap();
    assert_snapshot!(stmt.sql, @r###"DELETE FROM "users""###);
}

#[test]
fn test_runtime_params_may_not_use_reserved_prefix() {
    let err = compile_err(
        r#"(q) => q.from("users").where(u => u.age > 18)"#,
        Params::new().set("__p1", 99),
    );
    assert!(err.contains("reserved"), "unexpected error: {err}");
}

#[test]
fn test_ordering_guards() {
    let err = compile_err(r#"(q) => q.from("users").thenBy(u => u.age)"#, Params::new());
    assert!(err.contains("thenBy requires a preceding orderBy"), "unexpected error: {err}");

    let err = compile_err(
        r#"(q) => q.from("users").orderBy(u => u.age).thenBy(u => u.name).orderBy(u => u.id)"#,
        Params::new(),
    );
    assert!(err.contains("orderBy cannot follow thenBy"), "unexpected error: {err}");

    let err = compile_err(r#"(q) => q.from("users").reverse()"#, Params::new());
    assert!(err.contains("reverse requires an ordered query"), "unexpected error: {err}");
}

#[test]
fn test_visitor_error_conditions() {
    let err = compile_err(r#"(q) => q.from("users").frobnicate()"#, Params::new());
    assert!(err.contains("chain method `frobnicate` not found"), "unexpected error: {err}");

    let err = compile_err(r#"(q) => q.from("users").where(u => u.ages > 1)"#, Params::new());
    assert!(err.contains("column of table `users` `ages` not found"), "unexpected error: {err}");

    let err = compile_err(r#"(q) => q.from("missing")"#, Params::new());
    assert!(err.contains("table `missing` not found"), "unexpected error: {err}");

    let err = compile_err(r#"(q) => q.from("users").select(u => ({}))"#, Params::new());
    assert!(err.contains("empty object projection"), "unexpected error: {err}");

    let err = compile_err(r#"(q) => q.from("users").where(u => !u.age)"#, Params::new());
    assert!(err.contains("not boolean"), "unexpected error: {err}");

    let err = compile_err(r#"(q) => q.from("users").select(() => 1 + 2)"#, Params::new());
    assert!(err.contains("literals only"), "unexpected error: {err}");

    let err = compile_err(
        r#"(q, p, h) => q.from("users").select(u => ({ r: h.window(u).partitionBy(x => x.age) }))"#,
        Params::new(),
    );
    assert!(err.contains("malformed window chain"), "unexpected error: {err}");

    let err = compile_err(r#"(q) => q.from("users").where(u => u.name[0] == "J")"#, Params::new());
    assert!(err.contains("computed member access"), "unexpected error: {err}");
}

#[test]
fn test_returning_is_guarded_on_mysql() {
    let plan = define_insert_with(
        &schema(),
        Dialect::MySql,
        r#"(q, p) => q.insertInto("users").values({ name: p.name }).returning(u => u.id)"#,
        &NO_CACHE,
    )
    .unwrap();
    let err = plan.to_sql(&Params::new()).unwrap_err().to_string();
    assert!(err.contains("RETURNING is not supported"), "unexpected error: {err}");
}

#[test]
fn test_reparse_is_deterministic() {
    let source = r#"(q) => q.from("users").where(u => u.age >= 21 && u.name == "Ada").take(5)"#;
    let first = define_select_with(&schema(), Dialect::Postgres, source, &NO_CACHE).unwrap();
    let second = define_select_with(&schema(), Dialect::Postgres, source, &NO_CACHE).unwrap();

    assert_eq!(first.query(), second.query());
    assert_eq!(first.auto_params(), second.auto_params());
}

#[test]
fn test_query_json_round_trip() {
    let plan = define_select_with(
        &schema(),
        Dialect::Postgres,
        r#"(q) => q.from("users").where(u => u.age > 18).orderBy(u => u.name).take(3)"#,
        &NO_CACHE,
    )
    .unwrap();

    let json = crate::json_of_query(plan.query()).unwrap();
    let round_tripped = crate::query_of_json(&json).unwrap();
    assert_eq!(&round_tripped, plan.query());
}

#[test]
fn test_to_sql_is_pure() {
    let plan = define_select_with(
        &schema(),
        Dialect::Postgres,
        r#"(q, p) => q.from("users").where(u => u.age > p.min)"#,
        &NO_CACHE,
    )
    .unwrap();

    let a = plan.to_sql(&Params::new().set("min", 1)).unwrap();
    let b = plan.to_sql(&Params::new().set("min", 2)).unwrap();
    assert_eq!(a.sql, b.sql);
    assert_eq!(b.params.get("min"), Some(&crate::ParamValue::Int(2)));
}

#[test]
fn test_define_rejects_mismatched_chain_kind() {
    let err = define_select_with(
        &schema(),
        Dialect::Postgres,
        r#"(q) => q.deleteFrom("users").allowFullTableDelete()"#,
        &NO_CACHE,
    )
    .unwrap_err()
    .to_string();
    assert!(err.contains("expected a select chain"), "unexpected error: {err}");
}
