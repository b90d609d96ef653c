use chrono::Utc;
use reconciler::{EntityFilter, Reconciler};
use shared::protocol::WorkerEvent;

fn replay(reconciler: &mut Reconciler, frames: &[&str]) {
    for frame in frames {
        let event: WorkerEvent = serde_json::from_str(frame).expect("frame decodes");
        reconciler.ingest(event, Utc::now());
    }
}

#[test]
fn reconnect_snapshot_converges_with_uninterrupted_stream() {
    let session = [
        r#"{"event":"update_cheat_sheet","data":{"name":"Wellington","type":"Character","description":"Duke."}}"#,
        r#"{"event":"update_cheat_sheet","data":{"name":"Waterloo","type":"Location","description":"Battlefield."}}"#,
        r#"{"event":"update_timeline_event","data":{"name":"Battle of Waterloo","date":"1815-06-18","description":""}}"#,
        r#"{"event":"update_cheat_sheet","data":{"name":"Wellington","type":"Character","description":"Duke of Wellington."}}"#,
    ];

    let mut live = Reconciler::new();
    replay(&mut live, &session);

    // a client that missed the deltas and only saw the snapshots after reconnecting
    let mut reconnected = Reconciler::new();
    replay(
        &mut reconnected,
        &[
            r#"{"event":"update_cheat_sheet","data":{"name":"Stale","type":"Concept","description":"gone"}}"#,
            r#"{"event":"initial_cheat_sheet","data":[
                {"name":"Waterloo","type":"Location","description":"Battlefield."},
                {"name":"Wellington","type":"Character","description":"Duke of Wellington."}
            ]}"#,
            r#"{"event":"initial_timeline_data","data":[{"name":"Battle of Waterloo","date":"1815-06-18","description":""}]}"#,
        ],
    );

    assert_eq!(live.entity_view(), reconnected.entity_view());
    assert_eq!(live.timeline_view(), reconnected.timeline_view());

    live.set_filter(EntityFilter::Kind("Location".to_string()));
    reconnected.set_filter(EntityFilter::Kind("Location".to_string()));
    assert_eq!(live.entity_view(), reconnected.entity_view());
}
