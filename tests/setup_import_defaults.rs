mod test_support;

use serde_json::json;
use test_support::{error_code, request, request_ok, sidecar_with_workspace};

#[test]
fn import_setup_defaults_and_validation() {
    let (_child, mut stdin, mut reader, _ws) = sidecar_with_workspace("coursedesk-setup");

    let got = request_ok(&mut stdin, &mut reader, "1", "setup.get", json!({}));
    assert_eq!(
        got["import"],
        json!({
            "defaultMode": "insert_only",
            "delimiter": "auto",
            "warnOnTargetMismatch": true
        })
    );

    for (i, patch) in [
        json!({ "defaultMode": "upsert" }),
        json!({ "delimiter": "colon" }),
        json!({ "warnOnTargetMismatch": "yes" }),
        json!({ "batchSize": 10 }),
    ]
    .into_iter()
    .enumerate()
    {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("bad{i}"),
            "setup.update",
            json!({ "section": "import", "patch": patch }),
        );
        assert_eq!(error_code(&resp), Some("bad_params"), "patch {i}");
    }

    let unknown = request(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({ "section": "grading", "patch": {} }),
    );
    assert_eq!(error_code(&unknown), Some("bad_params"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({
            "section": "import",
            "patch": { "defaultMode": "UPDATE_IF_KEY_PRESENT", "warnOnTargetMismatch": false }
        }),
    );
    let got = request_ok(&mut stdin, &mut reader, "4", "setup.get", json!({}));
    assert_eq!(got["import"]["defaultMode"], "update_if_key_present");
    assert_eq!(got["import"]["delimiter"], "auto");
    assert_eq!(got["import"]["warnOnTargetMismatch"], false);
}

#[test]
fn import_apply_uses_saved_defaults() {
    let (_child, mut stdin, mut reader, _ws) = sidecar_with_workspace("coursedesk-setup-apply");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "import.apply",
        json!({ "csvText": "module|tab_number|title\nWeek 1|tab1|Intro\n" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({
            "section": "import",
            "patch": {
                "defaultMode": "update_if_key_present",
                "delimiter": "pipe",
                "warnOnTargetMismatch": false
            }
        }),
    );

    let out = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "import.apply",
        json!({ "csvText": "tab_id|module|tab_number|title\n1|Week 1|tab1|Renamed\n" }),
    );
    assert_eq!(out["mode"], "update_if_key_present");
    assert_eq!(out["updated"], 1);

    let both = "module|tab_number|title|tab_id|task_type|question\nM|t|T||quiz|Q\n";
    let quiet = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "import.apply",
        json!({ "csvText": both, "table": "course_tabs" }),
    );
    assert_eq!(quiet["warnings"], json!([]));

    let comma = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "import.preview",
        json!({
            "csvText": "module,tab_number,title\nM,t,T\n",
            "delimiter": "comma"
        }),
    );
    assert_eq!(comma["table"], "course_tabs");
}
