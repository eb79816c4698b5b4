use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;

use fang_ingest::config::ImportConfig;
use fang_ingest::importer::ListingImporter;
use fang_ingest::models::{HouseStatus, ListingRecord, NewAgent, NewDistrict};
use fang_ingest::store::{MemStore, Store, StoreTx};

fn record(title: &str, district: &str, address: &str, price: Option<f64>) -> ListingRecord {
    ListingRecord {
        source_id: format!("id-{title}"),
        title: title.to_string(),
        house_url: "https://esf.fang.com/chushou/3_1.htm".to_string(),
        layout: "3室2厅".to_string(),
        house_type: "3室".to_string(),
        area_sqm: Some(90.0),
        floor: "中层".to_string(),
        total_floors: Some(18),
        orientation: "南北".to_string(),
        price_total_wan: price,
        unit_price: Some(33333.0),
        agent_name: "王强".to_string(),
        agent_store_url: String::new(),
        agent_id: None,
        community: "Acme小区".to_string(),
        region: format!("{district}-Center"),
        district_name: district.to_string(),
        sub_district: "Center".to_string(),
        address: address.to_string(),
        tags: vec!["满五唯一".to_string()],
        cover_image: String::new(),
        status: "available".to_string(),
        decoration: "精装".to_string(),
        build_year: 2010,
        description: "采光好".to_string(),
        longitude: 116.4,
        latitude: 39.9,
        city: "北京".to_string(),
        data_source: "fang.com/top".to_string(),
        scraped_at: Utc::now(),
    }
}

fn write_batch(dir: &Path, name: &str, records: &[ListingRecord]) {
    let mut writer = csv::Writer::from_path(dir.join(name)).unwrap();
    for record in records {
        writer.serialize(record).unwrap();
    }
    writer.flush().unwrap();
}

fn importer(store: Arc<MemStore>, data_dir: PathBuf) -> ListingImporter {
    let cfg = ImportConfig {
        data_dir,
        media_root: PathBuf::from("/nonexistent-media"),
        ..ImportConfig::default()
    };
    ListingImporter::with_rng(store, cfg, StdRng::seed_from_u64(1))
}

#[tokio::test]
async fn single_row_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = tmp.path().join("data");
    fs::create_dir_all(&data_dir).unwrap();
    write_batch(
        &data_dir,
        "fang_top_1.csv",
        &[record("Sunny Flat", "Acme", "1 Main St", Some(300.0))],
    );

    let store = Arc::new(MemStore::new());
    let summary = importer(store.clone(), data_dir.clone()).run().await;

    assert_eq!(summary.files.len(), 1);
    let stats = &summary.files[0];
    assert_eq!(stats.created, 1);
    assert_eq!(stats.updated, 0);
    assert_eq!(stats.skipped, 0);
    assert_eq!(stats.errors, 0);
    assert!(stats.error_messages.is_empty());

    let districts = store.districts().await;
    assert_eq!(districts.len(), 1);
    assert_eq!(districts[0].name, "Acme");
    assert_eq!(districts[0].city, "北京");
    assert_eq!(districts[0].description, "Acme-Center");

    let agents = store.agents().await;
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].real_name, "王强");
    assert_eq!(agents[0].company, "北京经纪联盟");
    assert!(agents[0].is_verified);

    let houses = store.houses().await;
    assert_eq!(houses.len(), 1);
    let house = &houses[0];
    assert_eq!(house.title, "Sunny Flat");
    assert_eq!(house.district_id, districts[0].id);
    assert_eq!(house.address, "1 Main St");
    assert_eq!(house.fields.price.to_string(), "300.00");
    assert_eq!(house.fields.area.to_string(), "90.00");
    assert_eq!(house.fields.unit_price.to_string(), "33333.00");
    assert_eq!(house.fields.house_type, "3室");
    assert_eq!(house.fields.status, HouseStatus::Available);
    assert_eq!(house.fields.agent_id, Some(agents[0].id));
    assert_eq!(house.fields.views, 0);
    assert!(house.fields.description.contains("来源: fang.com/top"));
    assert!(house.fields.description.contains("ID: id-Sunny Flat"));

    let images = store.images().await;
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].house_id, house.id);
    assert_eq!(images[0].order, 0);
}

#[tokio::test]
async fn reimport_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = tmp.path().join("data");
    fs::create_dir_all(&data_dir).unwrap();
    let batch = [record("Sunny Flat", "Acme", "1 Main St", Some(300.0))];

    let store = Arc::new(MemStore::new());
    let imp = importer(store.clone(), data_dir.clone());

    write_batch(&data_dir, "fang_top_1.csv", &batch);
    let first = imp.run().await;
    assert_eq!(first.total_created, 1);
    assert_eq!(first.total_updated, 0);

    // first file was archived; drop an identical batch and run again
    write_batch(&data_dir, "fang_top_2.csv", &batch);
    let second = imp.run().await;
    assert_eq!(second.total_created, 0);
    assert_eq!(second.total_updated, 1);
    assert_eq!(second.total_errors, 0);

    assert_eq!(store.houses().await.len(), 1);
    // same cover path resolves to the same image row, not a duplicate
    assert_eq!(store.images().await.len(), 1);
    assert_eq!(store.agents().await.len(), 1);
    assert_eq!(store.districts().await.len(), 1);
}

#[tokio::test]
async fn matching_key_updates_price_in_place() {
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = tmp.path().join("data");
    fs::create_dir_all(&data_dir).unwrap();

    let mut cheaper = record("Sunny Flat", "Acme", "1 Main St", Some(300.0));
    cheaper.source_id = "id-a".to_string();
    let mut pricier = record("Sunny Flat", "Acme", "1 Main St", Some(310.0));
    pricier.source_id = "id-b".to_string();
    write_batch(&data_dir, "fang_top_1.csv", &[cheaper, pricier]);

    let store = Arc::new(MemStore::new());
    let summary = importer(store.clone(), data_dir).run().await;

    assert_eq!(summary.total_created, 1);
    assert_eq!(summary.total_updated, 1);

    let houses = store.houses().await;
    assert_eq!(houses.len(), 1);
    assert_eq!(houses[0].fields.price.to_string(), "310.00");
}

#[tokio::test]
async fn rows_without_title_are_skipped() {
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = tmp.path().join("data");
    fs::create_dir_all(&data_dir).unwrap();
    write_batch(
        &data_dir,
        "fang_top_1.csv",
        &[
            record("", "Acme", "1 Main St", Some(300.0)),
            record("Sunny Flat", "Acme", "1 Main St", Some(300.0)),
        ],
    );

    let store = Arc::new(MemStore::new());
    let summary = importer(store.clone(), data_dir).run().await;

    let stats = &summary.files[0];
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.created, 1);
    assert_eq!(store.houses().await.len(), 1);
}

#[tokio::test]
async fn unreadable_file_is_counted_and_left_in_place() {
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = tmp.path().join("data");
    fs::create_dir_all(&data_dir).unwrap();
    // ragged row: three fields under a two-column header
    fs::write(
        data_dir.join("broken.csv"),
        "title,address\nSunny Flat,1 Main St,EXTRA\n",
    )
    .unwrap();

    let store = Arc::new(MemStore::new());
    let summary = importer(store.clone(), data_dir.clone()).run().await;

    assert_eq!(summary.total_errors, 1);
    assert_eq!(summary.files[0].error_messages.len(), 1);
    assert!(store.houses().await.is_empty());
    // a file that could not be read is retried on the next run
    assert!(data_dir.join("broken.csv").exists());
}

#[tokio::test]
async fn one_bad_file_does_not_block_others() {
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = tmp.path().join("data");
    fs::create_dir_all(&data_dir).unwrap();
    fs::write(data_dir.join("a_broken.csv"), "title,address\nx,y,z\n").unwrap();
    write_batch(
        &data_dir,
        "b_good.csv",
        &[record("Sunny Flat", "Acme", "1 Main St", Some(300.0))],
    );

    let store = Arc::new(MemStore::new());
    let summary = importer(store.clone(), data_dir).run().await;

    assert_eq!(summary.files.len(), 2);
    assert_eq!(summary.total_errors, 1);
    assert_eq!(summary.total_created, 1);
}

#[tokio::test]
async fn processed_files_are_archived_with_timestamp() {
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = tmp.path().join("data");
    fs::create_dir_all(&data_dir).unwrap();
    write_batch(
        &data_dir,
        "fang_top_1.csv",
        &[record("Sunny Flat", "Acme", "1 Main St", Some(300.0))],
    );

    let store = Arc::new(MemStore::new());
    importer(store, data_dir.clone()).run().await;

    assert!(!data_dir.join("fang_top_1.csv").exists());
    let archived: Vec<String> = fs::read_dir(data_dir.join("processed"))
        .unwrap()
        .flatten()
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(archived.len(), 1);
    assert!(archived[0].starts_with("fang_top_1_"));
    assert!(archived[0].ends_with(".csv"));
}

#[tokio::test]
async fn existing_district_is_patched_not_duplicated() {
    let store = Arc::new(MemStore::new());
    {
        let mut tx = store.begin().await.unwrap();
        tx.create_district(NewDistrict {
            name: "朝阳".to_string(),
            city: "上海".to_string(),
            description: String::new(),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    let tmp = tempfile::tempdir().unwrap();
    let data_dir = tmp.path().join("data");
    fs::create_dir_all(&data_dir).unwrap();
    write_batch(
        &data_dir,
        "fang_top_1.csv",
        &[record("望京新城", "朝阳-望京", "望京新城 / 朝阳-望京", Some(680.0))],
    );

    let summary = importer(store.clone(), data_dir).run().await;
    assert_eq!(summary.total_created, 1);

    let districts = store.districts().await;
    assert_eq!(districts.len(), 1);
    assert_eq!(districts[0].name, "朝阳");
    assert_eq!(districts[0].city, "北京");
    assert_eq!(districts[0].description, "朝阳-望京-Center");
}

#[tokio::test]
async fn agent_matched_by_username_gets_real_name_backfilled() {
    let store = Arc::new(MemStore::new());
    {
        let mut tx = store.begin().await.unwrap();
        tx.create_agent(NewAgent {
            username: "王强".to_string(),
            phone: "13100000000".to_string(),
            real_name: String::new(),
            company: String::new(),
            is_verified: false,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    let tmp = tempfile::tempdir().unwrap();
    let data_dir = tmp.path().join("data");
    fs::create_dir_all(&data_dir).unwrap();
    write_batch(
        &data_dir,
        "fang_top_1.csv",
        &[record("Sunny Flat", "Acme", "1 Main St", Some(300.0))],
    );

    importer(store.clone(), data_dir).run().await;

    let agents = store.agents().await;
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].username, "王强");
    assert_eq!(agents[0].real_name, "王强");
}

#[tokio::test]
async fn missing_numeric_cells_become_zero_quantized() {
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = tmp.path().join("data");
    fs::create_dir_all(&data_dir).unwrap();

    let mut sparse = record("Bare Flat", "Acme", "2 Main St", None);
    sparse.area_sqm = None;
    sparse.unit_price = None;
    write_batch(&data_dir, "fang_top_1.csv", &[sparse]);

    let store = Arc::new(MemStore::new());
    importer(store.clone(), data_dir).run().await;

    let houses = store.houses().await;
    assert_eq!(houses[0].fields.price.to_string(), "0.00");
    assert_eq!(houses[0].fields.area.to_string(), "0.00");
    assert_eq!(houses[0].fields.unit_price.to_string(), "0.00");
    assert_eq!(houses[0].fields.longitude.to_string(), "116.4000000");
}
