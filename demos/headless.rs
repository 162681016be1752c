use std::sync::{Arc, Mutex};

use tilescape::prelude::*;

/// Drives the engine headless: no renderer, just the view controller, the
/// tile grid, and a fake tile source, wired the way a UI host would wire
/// them.
fn main() -> tilescape::Result<()> {
    #[cfg(feature = "debug")]
    env_logger::init();

    let size = Point::new(1024.0, 768.0);
    let mut map = Map::new(
        MapOptions::default().with_view(LatLng::new(37.7749, -122.4194), 12.0),
        size,
    )?;
    println!("map ready at {:?} zoom {}", map.get_center(), map.get_zoom());

    let grid = TileGrid::with_loader_config(
        *map.crs(),
        Arc::new(FixedTileSource::new()),
        size,
        GridOptions::default(),
        LoaderConfig::for_testing(),
    );
    grid.set_event_parent(map.events());
    let grid = Arc::new(Mutex::new(grid));
    TileGrid::subscribe(&grid, &map);
    grid.lock()
        .unwrap()
        .set_view(map.get_center(), map.get_zoom(), false, false)?;

    map.on("tileload", |env| {
        if let MapEvent::TileLoad { coords } = env.event {
            println!("  tile {} ready", coords.key());
        }
    });

    let stops = [
        ("New York", LatLng::new(40.7128, -74.0060), 11.0),
        ("London", LatLng::new(51.5074, -0.1278), 10.0),
        ("Tokyo", LatLng::new(35.6762, 139.6503), 12.0),
    ];

    for (name, center, zoom) in stops {
        println!("flying to {}", name);
        map.fly_to(center, Some(zoom), ViewOptions::default())?;

        // Frame pump: a UI host would do this from its event loop.
        let start = Instant::now();
        let mut frame: u64 = 0;
        while map.is_animating() && frame < 4000 {
            map.tick(start + Duration::from_millis(16 * frame));
            grid.lock().unwrap().process_results(Instant::now());
            frame += 1;
        }

        // Let outstanding tile fetches drain.
        let deadline = Instant::now() + Duration::from_secs(2);
        while grid.lock().unwrap().pending_loads() > 0 && Instant::now() < deadline {
            grid.lock().unwrap().process_results(Instant::now());
            std::thread::sleep(Duration::from_millis(5));
        }
        grid.lock()
            .unwrap()
            .process_results(Instant::now() + Duration::from_secs(1));

        let grid = grid.lock().unwrap();
        println!(
            "  {}: {} tiles cached at pyramid zoom {:?}",
            name,
            grid.tile_count(),
            grid.tile_zoom()
        );
    }

    let shown: Vec<String> = grid
        .lock()
        .unwrap()
        .tiles()
        .take(4)
        .map(|t| t.wrapped.key())
        .collect();
    println!("sample tiles: {:?}", shown);

    Ok(())
}
