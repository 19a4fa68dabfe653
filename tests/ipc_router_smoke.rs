mod test_support;

use serde_json::json;
use std::io::{BufRead, Write};
use test_support::{request, request_ok, spawn_sidecar, str_field, temp_dir};

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("termledger-router-smoke");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (i, r) = (&mut stdin, &mut reader);

    let health = request_ok(i, r, "1", "health", json!({}));
    assert!(health["workspacePath"].is_null());
    request_ok(i, r, "2", "workspace.select", json!({ "path": workspace.to_string_lossy() }));
    request_ok(i, r, "3", "settings.update", json!({ "patch": {
        "promotionThreshold": 50, "currentSession": "2024/2025", "currentTerm": "First Term"
    }}));
    let a = str_field(&request_ok(i, r, "4", "classes.create", json!({ "name": "Primary 1" })), "classId");
    let b = str_field(&request_ok(i, r, "5", "classes.create", json!({ "name": "Primary 2" })), "classId");
    let student = str_field(
        &request_ok(i, r, "6", "students.create", json!({ "classId": a, "firstName": "Ada" })),
        "studentId",
    );
    let fee = str_field(
        &request_ok(i, r, "7", "fees.create", json!({ "name": "Books", "amount": 800, "isOptional": true })),
        "feeId",
    );

    let calls = vec![
        ("settings.get", json!({})),
        ("classes.list", json!({})),
        ("classes.reorder", json!({ "classIds": [a, b] })),
        ("students.list", json!({ "classId": a })),
        ("students.assignFees", json!({ "studentId": student, "feeIds": [fee] })),
        ("discounts.add", json!({ "studentId": student, "amount": 100, "category": "discount" })),
        ("fees.list", json!({})),
        ("payments.record", json!({ "studentId": student, "amount": 200 })),
        ("payments.list", json!({ "studentId": student })),
        ("scores.upsert", json!({ "studentId": student, "rows": [{ "subject": "Maths", "total": 55 }] })),
        ("scores.list", json!({ "classId": a })),
        ("scores.sessionSummary", json!({ "studentId": student })),
        ("grades.compute", json!({ "total": 55 })),
        ("ranking.position", json!({ "studentId": student })),
        ("ranking.class", json!({ "classId": a })),
        ("reports.student", json!({ "studentId": student })),
        ("ledger.student", json!({ "studentId": student })),
        ("ledger.class", json!({ "classId": a })),
        ("payroll.payslip", json!({ "base": 1000, "allowances": [{ "label": "x", "amount": 10 }] })),
    ];
    for (n, (method, params)) in calls.into_iter().enumerate() {
        request_ok(i, r, &format!("c{}", n), method, params);
    }

    let proposal = request_ok(i, r, "p1", "promotion.propose", json!({ "classId": a }));
    let pid = str_field(&proposal, "id");
    request_ok(i, r, "p2", "promotion.get", json!({ "proposalId": pid }));
    request_ok(i, r, "p3", "promotion.override", json!({ "proposalId": pid, "studentId": student }));
    request_ok(i, r, "p4", "promotion.discard", json!({ "proposalId": pid }));
    let again = request_ok(i, r, "p5", "promotion.propose", json!({ "classId": a }));
    request_ok(i, r, "p6", "promotion.commit", json!({ "proposalId": str_field(&again, "id") }));

    let unknown = request(i, r, "x", "grid.open", json!({}));
    assert_eq!(unknown["error"]["code"], json!("not_implemented"));
}

#[test]
fn malformed_line_gets_bad_json_and_loop_continues() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "{{not json").expect("write");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read");
    let v: serde_json::Value = serde_json::from_str(line.trim()).expect("json");
    assert_eq!(v["ok"], json!(false));
    assert_eq!(v["error"]["code"], json!("bad_json"));

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").is_some());
}
