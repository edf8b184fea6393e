use track_reco::event::Event;
use track_reco::geometry::TelescopeGeometry;
use track_reco::synthetic::ParticleGun;
use track_reco::RawHit;

/// Telescope of `n` axial/stereo planes every 50 mm starting at `x = 0`.
pub fn telescope(n: usize, stereo_angle: f64) -> TelescopeGeometry {
    assert!(n > 0, "telescope needs at least one plane");
    let depths: Vec<f64> = (0..n).map(|i| 50.0 * i as f64).collect();
    TelescopeGeometry::stereo_telescope(&depths, stereo_angle).expect("valid telescope")
}

/// Default electron gun: 2 GeV from `(-700, 0, 0)`, aimed across the planes.
pub fn electron() -> ParticleGun {
    ParticleGun::default()
}

/// Electron like [`electron`] with the initial azimuth set to `phi`.
pub fn electron_at(phi: f64, track_id: i32) -> ParticleGun {
    let p = 2.0;
    ParticleGun {
        momentum: nalgebra::Vector3::new(p * phi.cos(), p * phi.sin(), 0.0),
        track_id,
        ..ParticleGun::default()
    }
}

/// Event holding `hits` under the default raw-hit collection name.
pub fn event_with_hits(number: u64, hits: Vec<RawHit>) -> Event {
    let mut event = Event::new(number);
    event.add("TaggerSimHits", hits).expect("fresh event");
    event
}
