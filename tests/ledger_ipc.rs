mod test_support;

use serde_json::json;
use test_support::{f64_field, request_err, request_ok, spawn_sidecar, str_field, temp_dir};

#[test]
fn student_ledger_combines_fees_discounts_and_payments() {
    let workspace = temp_dir("termledger-ledger");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (i, r) = (&mut stdin, &mut reader);

    request_ok(i, r, "1", "workspace.select", json!({ "path": workspace.to_string_lossy() }));
    request_ok(i, r, "2", "settings.update", json!({ "patch": {
        "currentSession": "2024/2025", "currentTerm": "First Term"
    }}));
    let jss1 = str_field(&request_ok(i, r, "3", "classes.create", json!({ "name": "JSS1" })), "classId");
    let jss2 = str_field(&request_ok(i, r, "4", "classes.create", json!({ "name": "JSS2" })), "classId");

    request_ok(i, r, "5", "fees.create", json!({ "name": "Tuition", "amount": 5000, "classId": jss1 }));
    let bus = str_field(
        &request_ok(i, r, "6", "fees.create", json!({ "name": "Bus", "amount": 2000, "isOptional": true })),
        "feeId",
    );
    request_ok(i, r, "7", "fees.create", json!({ "name": "Lunch", "amount": 1500, "isOptional": true }));
    request_ok(i, r, "8", "fees.create", json!({ "name": "JSS2 Tuition", "amount": 9000, "classId": jss2 }));
    request_ok(i, r, "9", "fees.create", json!({ "name": "Next term", "amount": 700, "term": "Second Term" }));

    let ada = str_field(
        &request_ok(i, r, "10", "students.create", json!({ "classId": jss1, "firstName": "Ada" })),
        "studentId",
    );
    let bayo = str_field(
        &request_ok(i, r, "11", "students.create", json!({ "classId": jss1, "firstName": "Bayo" })),
        "studentId",
    );

    request_ok(i, r, "12", "students.assignFees", json!({ "studentId": ada, "feeIds": [bus] }));
    request_ok(i, r, "13", "discounts.add", json!({
        "studentId": ada, "amount": 1000, "category": "discount", "reason": "sibling"
    }));
    request_ok(i, r, "14", "payments.record", json!({ "studentId": ada, "amount": 2500 }));
    request_ok(i, r, "15", "payments.record", json!({ "studentId": ada, "amount": "1500" }));
    request_ok(i, r, "16", "payments.record", json!({ "studentId": ada, "amount": "garbage" }));

    let ledger = request_ok(i, r, "17", "ledger.student", json!({ "studentId": ada }));
    assert_eq!(f64_field(&ledger, "rawBill"), 7000.0);
    assert_eq!(f64_field(&ledger, "totalBill"), 6000.0);
    assert_eq!(f64_field(&ledger, "totalDiscount"), 1000.0);
    assert_eq!(f64_field(&ledger, "totalPaid"), 4000.0);
    assert_eq!(f64_field(&ledger, "balance"), 2000.0);
    assert_eq!(ledger["applicableFees"].as_array().expect("fees").len(), 2);

    // Bayo overpays into credit.
    request_ok(i, r, "18", "payments.record", json!({ "studentId": bayo, "amount": 7000 }));
    let class_ledger = request_ok(i, r, "19", "ledger.class", json!({ "classId": jss1 }));
    assert_eq!(f64_field(&class_ledger, "totalBilled"), 11000.0);
    assert_eq!(f64_field(&class_ledger, "totalPaid"), 11000.0);
    assert_eq!(f64_field(&class_ledger, "outstanding"), 2000.0);
    assert_eq!(f64_field(&class_ledger, "credit"), 2000.0);
    let rows = class_ledger["rows"].as_array().expect("rows");
    assert_eq!(rows[0]["studentId"], json!(ada));
    assert_eq!(f64_field(&rows[1], "balance"), -2000.0);
}

#[test]
fn discount_larger_than_bill_clamps_bill_but_not_balance() {
    let workspace = temp_dir("termledger-ledger-clamp");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (i, r) = (&mut stdin, &mut reader);

    request_ok(i, r, "1", "workspace.select", json!({ "path": workspace.to_string_lossy() }));
    let jss1 = str_field(&request_ok(i, r, "2", "classes.create", json!({ "name": "JSS1" })), "classId");
    request_ok(i, r, "3", "fees.create", json!({
        "name": "Tuition", "amount": 3000, "session": "2024/2025", "term": "First Term"
    }));

    let s = str_field(
        &request_ok(i, r, "4", "students.create", json!({ "classId": jss1, "lastName": "Okafor" })),
        "studentId",
    );
    request_ok(i, r, "5", "discounts.add", json!({
        "studentId": s, "amount": 5000, "category": "scholarship",
        "session": "2024/2025", "term": "First Term"
    }));
    request_ok(i, r, "6", "payments.record", json!({
        "studentId": s, "amount": 500, "session": "2024/2025", "term": "First Term"
    }));

    let ledger = request_ok(i, r, "7", "ledger.student", json!({
        "studentId": s, "session": "2024/2025", "term": "First Term"
    }));
    assert_eq!(f64_field(&ledger, "totalBill"), 0.0);
    assert_eq!(f64_field(&ledger, "totalScholarship"), 5000.0);
    assert_eq!(f64_field(&ledger, "balance"), -500.0);

    // No configured period and none given.
    assert_eq!(
        request_err(i, r, "8", "ledger.student", json!({ "studentId": s })),
        "validation_failed"
    );
    assert_eq!(
        request_err(i, r, "9", "ledger.student", json!({
            "studentId": "ghost", "session": "2024/2025", "term": "First Term"
        })),
        "not_found"
    );
    assert_eq!(
        request_err(i, r, "10", "discounts.add", json!({
            "studentId": s, "amount": 1, "category": "waiver",
            "session": "2024/2025", "term": "First Term"
        })),
        "bad_params"
    );
}
