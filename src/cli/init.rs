use crate::db::{get_connection, init_db};
use crate::error::Result;
use crate::settings::{get_data_dir, load_settings, save_settings, shellexpand_path};

pub fn run(data_dir: Option<String>) -> Result<()> {
    let mut settings = load_settings();
    if let Some(dir) = data_dir {
        settings.data_dir = shellexpand_path(&dir);
    }
    save_settings(&settings)?;

    // get_data_dir honors the BANKBOOK_DATA_DIR override.
    let resolved = get_data_dir();
    std::fs::create_dir_all(&resolved)?;

    let conn = get_connection(&resolved.join("bankbook.db"))?;
    init_db(&conn)?;

    println!("Initialized bankbook at {}", resolved.display());
    Ok(())
}
