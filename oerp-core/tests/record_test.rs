use demo_server::{demo_server, logged_in};
use futures_util::StreamExt;
use oerp_core::{
    Error, FieldError, FieldValue, RecordRef,
    chrono::NaiveDate,
    testing::Failure,
};
use serde_json::json;


#[tokio::test]
async fn test_browse_edit_and_write_back() {
    let server = demo_server();
    let mut session = logged_in(&server).await;

    let ids = session
        .search("res.partner", json!([["name", "=", "Acme"]]))
        .await
        .unwrap();
    assert_eq!(ids, [42]);

    let mut partner = session.browse("res.partner", ids[0]).await.unwrap();
    assert_eq!(partner.get("name").unwrap().as_str(), Some("Acme"));
    assert_eq!(partner.get("credit_limit").unwrap().as_f64(), Some(100.0));

    partner.set("credit_limit", 250.0).unwrap();
    assert!(partner.is_dirty());
    assert!(session.write_record(&mut partner).await.unwrap());

    let writes = server.object_calls("write");
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].model(), Some("res.partner"));
    assert_eq!(writes[0].model_args()[0], json!([42]));
    assert_eq!(writes[0].model_args()[1], json!({"credit_limit": 250.0}));

    assert!(!partner.is_dirty());
    assert_eq!(partner.get("credit_limit").unwrap().as_f64(), Some(250.0));
    assert_eq!(partner.raw_data()["credit_limit"], json!(250.0));
}

#[tokio::test]
async fn test_write_sends_only_dirty_fields() {
    let server = demo_server();
    let mut session = logged_in(&server).await;
    let mut partner = session.browse("res.partner", 42).await.unwrap();

    partner.set("name", "Acme Corp").unwrap();
    partner.set("active", false).unwrap();
    partner.set("name", "Acme Inc").unwrap();
    assert_eq!(partner.dirty_fields(), ["name", "active"]);

    session.write_record(&mut partner).await.unwrap();

    let writes = server.object_calls("write");
    assert_eq!(
        writes[0].model_args()[1],
        json!({"name": "Acme Inc", "active": false})
    );
}

#[tokio::test]
async fn test_write_without_edits_sends_empty_values() {
    let server = demo_server();
    let mut session = logged_in(&server).await;
    let mut partner = session.browse("res.partner", 43).await.unwrap();

    session.write_record(&mut partner).await.unwrap();

    let writes = server.object_calls("write");
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].model_args()[1], json!({}));
}

#[tokio::test]
async fn test_reset_discards_edits_without_round_trip() {
    let server = demo_server();
    let mut session = logged_in(&server).await;
    let mut partner = session.browse("res.partner", 42).await.unwrap();
    server.clear_calls();

    partner.set("credit_limit", 1.0).unwrap();
    partner.set("type", "invoice").unwrap();

    session.reset(&mut partner);
    let first = partner.get("credit_limit").unwrap();
    session.reset(&mut partner);
    let second = partner.get("credit_limit").unwrap();

    assert_eq!(first, second);
    assert_eq!(second.as_f64(), Some(100.0));
    assert_eq!(partner.get("type").unwrap().as_str(), Some("default"));
    assert!(!partner.is_dirty());
    assert!(server.calls().is_empty());
}

#[tokio::test]
async fn test_refresh_reloads_server_values() {
    let server = demo_server();
    let mut session = logged_in(&server).await;
    let mut partner = session.browse("res.partner", 42).await.unwrap();
    let mut other = session.browse("res.partner", 42).await.unwrap();

    other.set("name", "Renamed").unwrap();
    session.write_record(&mut other).await.unwrap();
    partner.set("credit_limit", 1.0).unwrap();

    session.refresh(&mut partner).await.unwrap();

    assert_eq!(partner.get("name").unwrap().as_str(), Some("Renamed"));
    assert_eq!(partner.get("credit_limit").unwrap().as_f64(), Some(100.0));
    assert!(!partner.is_dirty());
}

#[tokio::test]
async fn test_many2one_round_trip() {
    let server = demo_server();
    let mut session = logged_in(&server).await;
    let mut partner = session.browse("res.partner", 42).await.unwrap();

    let country = partner.get("country_id").unwrap();
    assert_eq!(country.as_record(), Some(&RecordRef::new("res.country", 21)));
    let belgium = session.browse_ref(country.as_record().unwrap()).await.unwrap();
    assert_eq!(belgium.get("code").unwrap().as_str(), Some("BE"));

    let france = session.browse("res.country", 74).await.unwrap();
    partner.set("country_id", &france).unwrap();
    assert_eq!(partner.get("country_id").unwrap(), FieldValue::Record(france.reference()));
    session.write_record(&mut partner).await.unwrap();

    let writes = server.object_calls("write");
    assert_eq!(writes[0].model_args()[1], json!({"country_id": 74}));
    assert_eq!(partner.raw_data()["country_id"], json!([74, "France"]));
    assert_eq!(
        partner.get("country_id").unwrap().as_record(),
        Some(&RecordRef::new("res.country", 74))
    );
    assert!(partner.get("country_id").unwrap().as_record().unwrap() == &france);
}

#[tokio::test]
async fn test_many2one_assignments() {
    let server = demo_server();
    let mut session = logged_in(&server).await;
    let mut partner = session.browse("res.partner", 43).await.unwrap();
    let other_partner = session.browse("res.partner", 42).await.unwrap();
    server.clear_calls();

    assert_eq!(partner.get("country_id").unwrap(), FieldValue::Empty);

    session
        .set_many2one(&mut partner, "country_id", 21)
        .await
        .unwrap();
    assert_eq!(
        partner.get("country_id").unwrap().as_record(),
        Some(&RecordRef::new("res.country", 21))
    );
    assert_eq!(server.object_calls("read")[0].model(), Some("res.country"));
    assert_eq!(partner.dirty_fields(), ["country_id"]);

    assert!(matches!(
        partner.set("country_id", 21),
        Err(FieldError::Validation { .. })
    ));

    let err = partner.set("country_id", &other_partner).unwrap_err();
    assert_eq!(
        err,
        FieldError::RelationMismatch {
            field: "country_id".to_string(),
            expected: "res.country".to_string(),
            found: "res.partner".to_string(),
        }
    );

    partner.set("country_id", FieldValue::Empty).unwrap();
    session.write_record(&mut partner).await.unwrap();
    assert_eq!(
        server.object_calls("write")[0].model_args()[1],
        json!({"country_id": false})
    );
}

#[tokio::test]
async fn test_x2many_fields_are_read_only() {
    let server = demo_server();
    let mut session = logged_in(&server).await;
    let mut partner = session.browse("res.partner", 42).await.unwrap();

    let children = partner.get("child_ids").unwrap();
    assert_eq!(children.as_records(), Some(&[RecordRef::new("res.partner", 43)][..]));
    assert_eq!(partner.get("category_id").unwrap(), FieldValue::Records(vec![]));

    let err = partner
        .set("category_id", vec![RecordRef::new("res.partner.category", 1)])
        .unwrap_err();
    assert!(matches!(err, FieldError::NotSupported { kind: "many2many", .. }));
    assert!(!partner.is_dirty());
}

#[tokio::test]
async fn test_selection_validation() {
    let server = demo_server();
    let mut session = logged_in(&server).await;
    let mut partner = session.browse("res.partner", 42).await.unwrap();

    partner.set("type", "delivery").unwrap();
    assert_eq!(partner.get("type").unwrap().as_str(), Some("delivery"));
    session.reset(&mut partner);

    let err = partner.set("type", "warehouse").unwrap_err();
    assert!(matches!(err, FieldError::Validation { ref field, .. } if field == "type"));
    assert_eq!(partner.get("type").unwrap().as_str(), Some("default"));
    assert!(!partner.is_dirty());

    let err: Error = partner.set("name", false).unwrap_err().into();
    assert!(matches!(err, Error::Field(FieldError::Validation { .. })));
}

#[tokio::test]
async fn test_dates_are_decoded() {
    let server = demo_server();
    let mut session = logged_in(&server).await;
    let mut partner = session.browse("res.partner", 42).await.unwrap();

    let day = NaiveDate::from_ymd_opt(2012, 3, 14).unwrap();
    assert_eq!(partner.get("date").unwrap().as_date(), Some(day));

    partner.set("date", day.succ_opt().unwrap()).unwrap();
    session.write_record(&mut partner).await.unwrap();

    assert_eq!(
        server.object_calls("write")[0].model_args()[1],
        json!({"date": "2012-03-15"})
    );
    assert!(matches!(
        partner.set("date", "15/03/2012"),
        Err(FieldError::Validation { .. })
    ));
}

#[tokio::test]
async fn test_record_identity() {
    let server = demo_server();
    let mut session = logged_in(&server).await;

    let a = session.browse("res.partner", 42).await.unwrap();
    let mut b = session.browse("res.partner", 42).await.unwrap();
    let c = session.browse("res.partner", 43).await.unwrap();
    b.set("credit_limit", 1.0).unwrap();

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a, RecordRef::new("res.partner", 42));
    assert_ne!(a, RecordRef::new("res.country", 42));
    assert_eq!(a.to_string(), "browse_record(res.partner, 42)");
}

#[tokio::test]
async fn test_unknown_record() {
    let server = demo_server();
    let mut session = logged_in(&server).await;

    let result = session.browse("res.partner", 999).await;

    match result {
        Err(Error::UnknownRecord { model, id }) => {
            assert_eq!(model, "res.partner");
            assert_eq!(id, 999);
        }
        other => panic!("Expected an unknown record error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_model() {
    let server = demo_server();
    let mut session = logged_in(&server).await;

    let result = session.get("res.unknown").await;

    assert!(matches!(
        result,
        Err(Error::UnknownModel { ref model, .. }) if model == "res.unknown"
    ));
}

#[tokio::test]
async fn test_unsupported_field_kind() {
    let server = demo_server().with_model(
        "ir.attachment",
        json!({"datas": {"type": "binary"}, "payload": {"type": "serialized"}}),
    );
    let mut session = logged_in(&server).await;

    let result = session.get("ir.attachment").await;

    assert!(matches!(
        result,
        Err(Error::UnsupportedFieldKind { ref kind, .. }) if kind == "serialized"
    ));
}

#[tokio::test]
async fn test_schema_is_fetched_once() {
    let server = demo_server();
    let mut session = logged_in(&server).await;

    session.browse("res.partner", 42).await.unwrap();
    session.browse("res.partner", 43).await.unwrap();
    assert_eq!(server.object_calls("fields_get").len(), 1);

    session.invalidate("res.partner");
    session.browse("res.partner", 42).await.unwrap();
    assert_eq!(server.object_calls("fields_get").len(), 2);

    session.clear_models();
    session.get("res.partner").await.unwrap();
    assert_eq!(server.object_calls("fields_get").len(), 3);
}

#[tokio::test]
async fn test_browse_many_is_lazy() {
    let server = demo_server();
    let mut session = logged_in(&server).await;

    let mut records = session
        .browse_many("res.partner", vec![42, 43, 999])
        .await
        .unwrap();
    assert!(server.object_calls("read").is_empty());

    let first = records.next().await.unwrap().unwrap();
    assert_eq!(first.id(), 42);
    assert_eq!(server.object_calls("read").len(), 1);

    let second = records.next().await.unwrap().unwrap();
    assert_eq!(second.get("name").unwrap().as_str(), Some("Agrolait"));
    assert!(matches!(
        records.next().await,
        Some(Err(Error::UnknownRecord { id: 999, .. }))
    ));
    assert!(records.next().await.is_none());
    drop(records);

    // A new stream over the same ids starts over.
    let again: Vec<_> = session
        .browse_many("res.partner", vec![42, 43])
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(again.len(), 2);
}

#[tokio::test]
async fn test_model_proxy() {
    let server = demo_server().with_method("res.partner", "check_vat", json!(true));
    let mut session = logged_in(&server).await;

    let mut partners = session.get("res.partner").await.unwrap();
    assert_eq!(partners.name(), "res.partner");
    assert!(partners.schema().field("country_id").is_some());

    assert_eq!(partners.count(json!([["active", "=", true]])).await.unwrap(), 2);
    assert_eq!(
        partners.call("check_vat", vec![json!([42])]).await.unwrap(),
        json!(true)
    );
    assert!(matches!(
        partners.call("no_such_method", vec![]).await,
        Err(Error::RemoteCall { .. })
    ));

    let active: Vec<_> = partners
        .browse_all(json!([["active", "=", true]]))
        .await
        .unwrap()
        .collect()
        .await;
    let names: Vec<_> = active
        .iter()
        .map(|r| r.as_ref().unwrap().get("name").unwrap())
        .collect();
    assert_eq!(names, [FieldValue::from("Acme"), FieldValue::from("Agrolait")]);

    let calls = server.object_calls("check_vat");
    assert_eq!(calls[0].model_args(), [json!([42])]);
}

#[tokio::test]
async fn test_synthetic_name_from_name_get() {
    let server = demo_server();
    let mut session = logged_in(&server).await;

    let mut account = session.browse("res.partner.bank", 7).await.unwrap();

    assert_eq!(server.object_calls("name_get").len(), 1);
    assert_eq!(
        account.get("name").unwrap().as_str(),
        Some("res.partner.bank,7")
    );
    assert!(matches!(
        account.set("name", "Main account"),
        Err(FieldError::ReadOnly { .. })
    ));

    let schema = account.schema().clone();
    assert_eq!(
        schema.field("partner_id").unwrap().to_string(),
        "many2one(string='Account Owner', relation='res.partner')"
    );
}

#[tokio::test]
async fn test_unlink_record_leaves_other_copies() {
    let server = demo_server();
    let mut session = logged_in(&server).await;
    let partner = session.browse("res.partner", 44).await.unwrap();
    let mut copy = session.browse("res.partner", 44).await.unwrap();

    assert!(session.unlink_record(&partner).await.unwrap());

    assert!(server.record("res.partner", 44).is_none());
    assert_eq!(copy.get("name").unwrap().as_str(), Some("Camptocamp"));
    assert!(matches!(
        session.refresh(&mut copy).await,
        Err(Error::UnknownRecord { id: 44, .. })
    ));
}

#[tokio::test]
async fn test_write_failure_keeps_edits() {
    let server = demo_server().fail("res.partner", "write", Failure::Timeout);
    let mut session = logged_in(&server).await;
    let mut partner = session.browse("res.partner", 42).await.unwrap();
    partner.set("credit_limit", 250.0).unwrap();

    let err = session.write_record(&mut partner).await.unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(partner.dirty_fields(), ["credit_limit"]);
    assert_eq!(
        server.record("res.partner", 42).unwrap()["credit_limit"],
        json!(100.0)
    );
}

#[tokio::test]
async fn test_set_many2one_to_missing_record() {
    let server = demo_server();
    let mut session = logged_in(&server).await;
    let mut partner = session.browse("res.partner", 43).await.unwrap();

    let err = session
        .set_many2one(&mut partner, "country_id", 9999)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::UnknownRecord { ref model, id: 9999 } if model == "res.country"
    ));
    assert!(!partner.is_dirty());
    assert_eq!(partner.get("country_id").unwrap(), FieldValue::Empty);
}

#[tokio::test]
async fn test_set_many2one_checks_the_field() {
    let server = demo_server();
    let mut session = logged_in(&server).await;
    let mut partners = session.get("res.partner").await.unwrap();
    let mut partner = partners.browse(42).await.unwrap();

    assert!(matches!(
        partners.set_many2one(&mut partner, "name", 21).await,
        Err(Error::Field(FieldError::Validation { .. }))
    ));
    assert!(matches!(
        partners.set_many2one(&mut partner, "parent_id", 21).await,
        Err(Error::Field(FieldError::UnknownField { .. }))
    ));

    partners
        .set_many2one(&mut partner, "country_id", 74)
        .await
        .unwrap();
    partners.write_record(&mut partner).await.unwrap();
    assert_eq!(
        server.record("res.partner", 42).unwrap()["country_id"],
        json!([74, "France"])
    );
}
