use std::time::Duration;

use bytes::Bytes;
use tokio::time::timeout;
use tracing_subscriber::{EnvFilter, fmt::SubscriberBuilder};
use webrtc::api::APIBuilder;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use pairing_receiver::peer::{
    PeerEvent, PeerTransport, PeerTransportFactory, SdpKind, SessionDescription,
    WebRtcPeerFactory,
};

fn init_tracing() {
    let _ = SubscriberBuilder::default()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn answers_a_data_channel_offer() {
    init_tracing();
    let api = APIBuilder::new().build();
    let offerer = api
        .new_peer_connection(RTCConfiguration::default())
        .await
        .expect("offerer peer connection");
    let channel = offerer
        .create_data_channel("pairing", None)
        .await
        .expect("offerer data channel");
    let offer = offerer.create_offer(None).await.expect("create offer");
    let mut gathered = offerer.gathering_complete_promise().await;
    offerer
        .set_local_description(offer)
        .await
        .expect("set local offer");
    let _ = gathered.recv().await;
    let offer = offerer.local_description().await.expect("offer sdp");

    let peer = WebRtcPeerFactory::new(Vec::new())
        .create()
        .await
        .expect("answerer peer");
    let mut events = peer.take_events().expect("event stream");
    let answer = peer
        .answer(SessionDescription::offer(offer.sdp))
        .await
        .expect("answer");
    assert_eq!(answer.kind, Some(SdpKind::Answer));
    assert!(answer.sdp.contains("m=application"));

    offerer
        .set_remote_description(RTCSessionDescription::answer(answer.sdp).expect("answer sdp"))
        .await
        .expect("apply answer");

    let connected = timeout(Duration::from_secs(15), async {
        while let Some(event) = events.recv().await {
            if event == PeerEvent::Connected {
                return true;
            }
        }
        false
    })
    .await
    .expect("data channel opened");
    assert!(connected);

    channel
        .send(&Bytes::from_static(b"hello"))
        .await
        .expect("offerer send");
    let data = timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if let PeerEvent::Data(data) = event {
                return Some(data);
            }
        }
        None
    })
    .await
    .expect("data delivered");
    assert_eq!(data, Some(Bytes::from_static(b"hello")));

    peer.close().await;
    let _ = offerer.close().await;
}
