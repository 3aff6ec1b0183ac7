//! Process-wide settings: tax tables, media catalogues, terminal and
//! printer inventories, credit-card policy, and period definitions.
//!
//! `settings.dat` is a versioned binary file (§ [`SETTINGS_VERSION`]).
//! Fields read in the order established here; new fields are appended
//! behind `version >= N` gates so old files keep loading with defaults.
//! The `.ini` overlays under `<data_path>/conf/` win over the binary
//! values on read and both forms are written on save.

use std::path::{Path, PathBuf};

use common::datafile::{
    write_with_backup, InputDataFile, KeyValueFile, OutputDataFile,
};
use common::money::RoundMode;
use common::percent::Percent;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PosError, PosResult};
use crate::menu::ItemFamily;
use crate::printer::PrinterTargetCode;

pub mod media;
pub mod periods;

use media::{
    CompInfo, CouponInfo, CreditCardInfo, DiscountInfo, MealInfo, MediaList,
    MediaScope,
};

/// Version written by this build.
pub const SETTINGS_VERSION: u32 = 106;
/// Oldest version still readable.
pub const SETTINGS_VERSION_MIN: u32 = 25;

/// Version used for the global `media.dat` slice.
pub const MEDIA_VERSION: u32 = 3;

/// How logins demand passwords.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum PasswordMode {
    /// Only employees with a password set are challenged.
    #[default]
    Optional,
    /// Everyone is challenged.
    Required,
    /// Nobody is challenged (managers are always challenged regardless).
    None,
}

impl PasswordMode {
    fn to_code(self) -> u8 {
        match self {
            Self::Optional => 0,
            Self::Required => 1,
            Self::None => 2,
        }
    }

    fn from_code(code: u8) -> PosResult<Self> {
        match code {
            0 => Ok(Self::Optional),
            1 => Ok(Self::Required),
            2 => Ok(Self::None),
            _ => Err(PosError::protocol(format!(
                "unknown password mode {code}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    // --- Store identity --- //
    pub store_name: String,
    pub store_address: String,
    pub receipt_header: Vec<String>,

    // --- Tax table --- //
    pub tax_food: Percent,
    pub tax_alcohol: Percent,
    pub tax_room: Percent,
    pub tax_merchandise: Percent,
    pub tax_gst: Percent,
    pub tax_pst: Percent,
    pub tax_hst: Percent,
    pub tax_qst: Percent,
    pub tax_vat: Percent,
    pub royalty_rate: Percent,
    /// Food and alcohol prices already include their tax.
    pub tax_inclusive_food: bool,
    pub tax_inclusive_alcohol: bool,
    /// Tax takeout food. Off exempts the food bucket for takeout kinds.
    pub tax_takeout_food: bool,

    // --- Price rounding --- //
    pub price_rounding: RoundMode,
    /// Quantum in cents the grand total is rounded to.
    pub price_rounding_unit: i64,
    /// Multiplier applied by the "double" order qualifier.
    pub double_mult: f64,

    // --- Terminal behaviour --- //
    pub password_mode: PasswordMode,
    /// Seconds of idle input before a terminal is blanked and logged out.
    pub screen_blank_time: u64,
    /// Seconds before an untouched start page reverts to login.
    pub start_page_timeout: u64,

    // --- Credit cards --- //
    pub allow_cc_preauth: bool,
    pub auto_authorize: bool,
    /// Keep full card numbers on finalized records (off masks them).
    pub use_entire_cc_num: bool,
    /// Seconds to wait on the authorization backend.
    pub cc_connect_timeout: u64,
    pub finalauth_receipt: bool,
    pub void_receipt: bool,
    pub cash_receipt: bool,

    // --- Routing --- //
    /// Family index → printer target code.
    pub family_printer: [PrinterTargetCode; ItemFamily::ALL.len()],
    /// Family index → kitchen video target code. The unified target
    /// editor keeps this equal in shape to `family_printer`.
    pub family_video: [PrinterTargetCode; ItemFamily::ALL.len()],

    // --- Labor --- //
    /// Start of the wage week in minutes from Sunday 00:00.
    pub wage_week_start: u32,

    // --- Media catalogues --- //
    pub discounts: MediaList<DiscountInfo>,
    pub coupons: MediaList<CouponInfo>,
    pub credit_cards: MediaList<CreditCardInfo>,
    pub comps: MediaList<CompInfo>,
    pub meals: MediaList<MealInfo>,
    /// Drop inactive media records when saving.
    pub prune_inactive_media: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_name: String::new(),
            store_address: String::new(),
            receipt_header: Vec::new(),
            tax_food: Percent::ZERO,
            tax_alcohol: Percent::ZERO,
            tax_room: Percent::ZERO,
            tax_merchandise: Percent::ZERO,
            tax_gst: Percent::ZERO,
            tax_pst: Percent::ZERO,
            tax_hst: Percent::ZERO,
            tax_qst: Percent::ZERO,
            tax_vat: Percent::ZERO,
            royalty_rate: Percent::ZERO,
            tax_inclusive_food: false,
            tax_inclusive_alcohol: false,
            tax_takeout_food: true,
            price_rounding: RoundMode::None,
            price_rounding_unit: 1,
            double_mult: 2.0,
            password_mode: PasswordMode::Optional,
            screen_blank_time: 60 * 10,
            start_page_timeout: 60,
            allow_cc_preauth: true,
            auto_authorize: false,
            use_entire_cc_num: false,
            cc_connect_timeout: 30,
            finalauth_receipt: true,
            void_receipt: true,
            cash_receipt: true,
            family_printer: [PrinterTargetCode::DEFAULT;
                ItemFamily::ALL.len()],
            family_video: [PrinterTargetCode::NONE; ItemFamily::ALL.len()],
            wage_week_start: 0,
            discounts: MediaList::new(),
            coupons: MediaList::new(),
            credit_cards: MediaList::new(),
            comps: MediaList::new(),
            meals: MediaList::new(),
            prune_inactive_media: false,
        }
    }
}

impl Settings {
    // --- Binary file I/O --- //

    /// Loads `settings.dat` from `path` and applies the `.ini` overlays
    /// under `conf_dir`. A missing file yields defaults (first boot).
    pub fn load(path: &Path, conf_dir: &Path) -> PosResult<Self> {
        let mut settings = match InputDataFile::open(
            path,
            SETTINGS_VERSION_MIN,
            SETTINGS_VERSION,
        ) {
            Ok(mut input) => Self::read(&mut input)?,
            Err(common::datafile::DataFileError::Io(e))
                if e.kind() == std::io::ErrorKind::NotFound =>
            {
                info!("no settings file at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };
        settings.apply_overlays(conf_dir)?;
        Ok(settings)
    }

    /// Reads the version-gated field sequence.
    pub fn read(input: &mut InputDataFile) -> PosResult<Self> {
        let version = input.version();
        let mut s = Self {
            store_name: input.get_str()?,
            store_address: input.get_str()?,
            ..Self::default()
        };
        let header_lines = input.get_u32()?;
        for _ in 0..header_lines {
            s.receipt_header.push(input.get_str()?);
        }

        s.tax_food = Percent::from_scaled(input.get_i32()?);
        s.tax_alcohol = Percent::from_scaled(input.get_i32()?);
        s.tax_inclusive_food = input.get_bool()?;
        s.tax_inclusive_alcohol = input.get_bool()?;
        s.tax_takeout_food = input.get_bool()?;
        s.price_rounding = RoundMode::from_code(input.get_u8()?)
            .ok_or_else(|| PosError::protocol("bad rounding mode"))?;
        s.password_mode = PasswordMode::from_code(input.get_u8()?)?;
        s.screen_blank_time = input.get_i64()?.max(0) as u64;
        s.start_page_timeout = input.get_i64()?.max(0) as u64;

        if version >= 30 {
            s.tax_room = Percent::from_scaled(input.get_i32()?);
            s.tax_merchandise = Percent::from_scaled(input.get_i32()?);
        }
        if version >= 45 {
            s.tax_gst = Percent::from_scaled(input.get_i32()?);
            s.tax_pst = Percent::from_scaled(input.get_i32()?);
            s.tax_hst = Percent::from_scaled(input.get_i32()?);
            s.tax_qst = Percent::from_scaled(input.get_i32()?);
        }
        if version >= 58 {
            s.tax_vat = Percent::from_scaled(input.get_i32()?);
            s.royalty_rate = Percent::from_scaled(input.get_i32()?);
        }
        if version >= 70 {
            for slot in s.family_printer.iter_mut() {
                *slot = PrinterTargetCode(input.get_u8()?);
            }
            for slot in s.family_video.iter_mut() {
                *slot = PrinterTargetCode(input.get_u8()?);
            }
        }
        if version >= 85 {
            s.allow_cc_preauth = input.get_bool()?;
            s.auto_authorize = input.get_bool()?;
            s.use_entire_cc_num = input.get_bool()?;
            s.cc_connect_timeout = input.get_i64()?.max(0) as u64;
            s.finalauth_receipt = input.get_bool()?;
            s.void_receipt = input.get_bool()?;
            s.cash_receipt = input.get_bool()?;
        }
        if version >= 96 {
            s.wage_week_start = input.get_u32()?;
        }
        if version >= 104 {
            s.double_mult = input.get_f64()?;
        } else {
            // Stored as an integer multiplier before version 104.
            s.double_mult = f64::from(input.get_i32()?);
        }
        if version >= 105 {
            s.price_rounding_unit = input.get_i64()?.max(1);
        }
        if version >= 106 {
            s.prune_inactive_media = input.get_bool()?;
        }

        // The local media slice follows the scalar fields.
        s.discounts.read_scope(input)?;
        s.coupons.read_scope(input)?;
        s.credit_cards.read_scope(input)?;
        s.comps.read_scope(input)?;
        s.meals.read_scope(input)?;

        Ok(s)
    }

    /// Saves `settings.dat` (always at [`SETTINGS_VERSION`]) and rewrites
    /// the overlays.
    pub fn save(&self, path: &Path, conf_dir: &Path) -> PosResult<()> {
        write_with_backup(path, SETTINGS_VERSION, |out| self.write(out))?;
        self.write_overlays(conf_dir)?;
        Ok(())
    }

    pub fn write(
        &self,
        out: &mut OutputDataFile,
    ) -> Result<(), common::datafile::DataFileError> {
        out.put_str(&self.store_name)?;
        out.put_str(&self.store_address)?;
        out.put_u32(self.receipt_header.len() as u32)?;
        for line in &self.receipt_header {
            out.put_str(line)?;
        }

        out.put_i32(self.tax_food.scaled())?;
        out.put_i32(self.tax_alcohol.scaled())?;
        out.put_bool(self.tax_inclusive_food)?;
        out.put_bool(self.tax_inclusive_alcohol)?;
        out.put_bool(self.tax_takeout_food)?;
        out.put_u8(self.price_rounding.to_code())?;
        out.put_u8(self.password_mode.to_code())?;
        out.put_i64(self.screen_blank_time as i64)?;
        out.put_i64(self.start_page_timeout as i64)?;

        out.put_i32(self.tax_room.scaled())?;
        out.put_i32(self.tax_merchandise.scaled())?;
        out.put_i32(self.tax_gst.scaled())?;
        out.put_i32(self.tax_pst.scaled())?;
        out.put_i32(self.tax_hst.scaled())?;
        out.put_i32(self.tax_qst.scaled())?;
        out.put_i32(self.tax_vat.scaled())?;
        out.put_i32(self.royalty_rate.scaled())?;

        for slot in &self.family_printer {
            out.put_u8(slot.0)?;
        }
        for slot in &self.family_video {
            out.put_u8(slot.0)?;
        }

        out.put_bool(self.allow_cc_preauth)?;
        out.put_bool(self.auto_authorize)?;
        out.put_bool(self.use_entire_cc_num)?;
        out.put_i64(self.cc_connect_timeout as i64)?;
        out.put_bool(self.finalauth_receipt)?;
        out.put_bool(self.void_receipt)?;
        out.put_bool(self.cash_receipt)?;
        out.put_u32(self.wage_week_start)?;
        out.put_f64(self.double_mult)?;
        out.put_i64(self.price_rounding_unit)?;
        out.put_bool(self.prune_inactive_media)?;

        let prune = self.prune_inactive_media;
        self.discounts.write_scope(out, MediaScope::Local, prune)?;
        self.coupons.write_scope(out, MediaScope::Local, prune)?;
        self.credit_cards.write_scope(out, MediaScope::Local, prune)?;
        self.comps.write_scope(out, MediaScope::Local, prune)?;
        self.meals.write_scope(out, MediaScope::Local, prune)?;
        Ok(())
    }

    // --- Global media slice --- //

    /// Loads `media.dat` (ids ≥ `GLOBAL_MEDIA_ID`) into the catalogues.
    pub fn load_global_media(&mut self, path: &Path) -> PosResult<()> {
        let mut input = match InputDataFile::open(path, 1, MEDIA_VERSION) {
            Ok(input) => input,
            Err(common::datafile::DataFileError::Io(e))
                if e.kind() == std::io::ErrorKind::NotFound =>
            {
                return Ok(())
            }
            Err(e) => return Err(e.into()),
        };
        self.discounts.read_scope(&mut input)?;
        self.coupons.read_scope(&mut input)?;
        self.credit_cards.read_scope(&mut input)?;
        self.comps.read_scope(&mut input)?;
        self.meals.read_scope(&mut input)?;
        Ok(())
    }

    pub fn save_global_media(&self, path: &Path) -> PosResult<()> {
        let prune = self.prune_inactive_media;
        write_with_backup(path, MEDIA_VERSION, |out| {
            self.discounts.write_scope(out, MediaScope::Global, prune)?;
            self.coupons.write_scope(out, MediaScope::Global, prune)?;
            self.credit_cards.write_scope(out, MediaScope::Global, prune)?;
            self.comps.write_scope(out, MediaScope::Global, prune)?;
            self.meals.write_scope(out, MediaScope::Global, prune)
        })?;
        Ok(())
    }

    /// Writes the full media snapshot (both scopes) carried by an
    /// archive, so historical tenders resolve even after the live
    /// catalogues change. Never prunes.
    pub fn save_media_snapshot(&self, path: &Path) -> PosResult<()> {
        write_with_backup(path, MEDIA_VERSION, |out| {
            for scope in [MediaScope::Local, MediaScope::Global] {
                self.discounts.write_scope(out, scope, false)?;
                self.coupons.write_scope(out, scope, false)?;
                self.credit_cards.write_scope(out, scope, false)?;
                self.comps.write_scope(out, scope, false)?;
                self.meals.write_scope(out, scope, false)?;
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Reads a media snapshot back into these catalogues.
    pub fn load_media_snapshot(&mut self, path: &Path) -> PosResult<()> {
        let mut input = InputDataFile::open(path, 1, MEDIA_VERSION)?;
        for _scope in 0..2 {
            self.discounts.read_scope(&mut input)?;
            self.coupons.read_scope(&mut input)?;
            self.credit_cards.read_scope(&mut input)?;
            self.comps.read_scope(&mut input)?;
            self.meals.read_scope(&mut input)?;
        }
        Ok(())
    }

    // --- INI overlays --- //

    /// Applies `tax.ini`, `fees.ini`, and `fastfood.ini`. Overlay values
    /// win over whatever the binary file said.
    pub fn apply_overlays(&mut self, conf_dir: &Path) -> PosResult<()> {
        let tax = KeyValueFile::load(conf_dir.join("tax.ini"))?;
        let pct = |section: &str, key: &str, slot: &mut Percent| {
            if let Some(value) = tax.get(section, key) {
                if let Ok(v) = value.parse::<f64>() {
                    *slot = Percent::from_f64(v);
                }
            }
        };
        pct("Sales Tax", "food", &mut self.tax_food);
        pct("Sales Tax", "alcohol", &mut self.tax_alcohol);
        pct("Sales Tax", "room", &mut self.tax_room);
        pct("Sales Tax", "merchandise", &mut self.tax_merchandise);
        pct("Sales Tax Canada", "GST", &mut self.tax_gst);
        pct("Sales Tax Canada", "PST", &mut self.tax_pst);
        pct("Sales Tax Canada", "HST", &mut self.tax_hst);
        pct("Sales Tax Canada", "QST", &mut self.tax_qst);
        pct("Sales Tax", "VAT", &mut self.tax_vat);
        if let Some(v) = tax.get_bool("Misc", "tax_takeout_food") {
            self.tax_takeout_food = v;
        }
        if let Some(v) = tax.get_bool("Misc", "tax_inclusive_food") {
            self.tax_inclusive_food = v;
        }
        if let Some(v) = tax.get_bool("Misc", "tax_inclusive_alcohol") {
            self.tax_inclusive_alcohol = v;
        }

        let fees = KeyValueFile::load(conf_dir.join("fees.ini"))?;
        if let Some(value) = fees.get("Fees", "royalty_rate") {
            if let Ok(v) = value.parse::<f64>() {
                self.royalty_rate = Percent::from_f64(v);
            }
        }

        let fastfood = KeyValueFile::load(conf_dir.join("fastfood.ini"))?;
        if let Some(v) = fastfood.get_bool("Fast Food", "cash_receipt") {
            self.cash_receipt = v;
        }
        Ok(())
    }

    /// Writes the overlays back; both representations persist on save.
    pub fn write_overlays(&self, conf_dir: &Path) -> PosResult<()> {
        let mut tax = KeyValueFile::new();
        tax.set("Sales Tax", "food", self.tax_food.as_f64())
            .set("Sales Tax", "alcohol", self.tax_alcohol.as_f64())
            .set("Sales Tax", "room", self.tax_room.as_f64())
            .set("Sales Tax", "merchandise", self.tax_merchandise.as_f64())
            .set("Sales Tax", "VAT", self.tax_vat.as_f64())
            .set("Sales Tax Canada", "GST", self.tax_gst.as_f64())
            .set("Sales Tax Canada", "PST", self.tax_pst.as_f64())
            .set("Sales Tax Canada", "HST", self.tax_hst.as_f64())
            .set("Sales Tax Canada", "QST", self.tax_qst.as_f64())
            .set("Misc", "tax_takeout_food", u8::from(self.tax_takeout_food))
            .set(
                "Misc",
                "tax_inclusive_food",
                u8::from(self.tax_inclusive_food),
            )
            .set(
                "Misc",
                "tax_inclusive_alcohol",
                u8::from(self.tax_inclusive_alcohol),
            );
        tax.save(conf_dir.join("tax.ini"))?;

        let mut fees = KeyValueFile::new();
        fees.set("Fees", "royalty_rate", self.royalty_rate.as_f64());
        fees.save(conf_dir.join("fees.ini"))?;

        let mut fastfood = KeyValueFile::new();
        fastfood.set("Fast Food", "cash_receipt", u8::from(self.cash_receipt));
        fastfood.save(conf_dir.join("fastfood.ini"))?;
        Ok(())
    }

    /// Conventional file locations under a data directory.
    pub fn settings_path(data_path: &Path) -> PathBuf {
        data_path.join("settings.dat")
    }

    pub fn media_path(data_path: &Path) -> PathBuf {
        data_path.join("media.dat")
    }

    pub fn conf_dir(data_path: &Path) -> PathBuf {
        data_path.join("conf")
    }
}

#[cfg(test)]
mod test {
    use common::money::Money;

    use super::media::MediaAmount;
    use super::*;

    fn sample() -> Settings {
        let mut s = Settings {
            store_name: "Harbor Grill".into(),
            tax_food: Percent::from_scaled(82_500),
            tax_alcohol: Percent::from_scaled(100_000),
            tax_gst: Percent::from_scaled(50_000),
            wage_week_start: 2 * 1440,
            double_mult: 1.75,
            ..Settings::default()
        };
        s.discounts.insert(DiscountInfo {
            id: 1,
            name: "manager 10%".into(),
            active: true,
            amount: MediaAmount::PercentOf(Percent::from_scaled(100_000)),
            pre_tax: true,
        });
        s.meals.insert(MealInfo {
            id: 1,
            name: "staff".into(),
            active: true,
            credit: Money::from_cents(800),
        });
        s
    }

    #[test]
    fn settings_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.dat");
        let conf = dir.path().join("conf");

        let settings = sample();
        settings.save(&path, &conf).unwrap();

        let reloaded = Settings::load(&path, &conf).unwrap();
        assert_eq!(reloaded, settings);
    }

    #[test]
    fn overlay_wins_over_binary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.dat");
        let conf = dir.path().join("conf");

        let settings = sample();
        settings.save(&path, &conf).unwrap();

        // Hand-edit the overlay the way a support tech would.
        let mut tax = KeyValueFile::load(conf.join("tax.ini")).unwrap();
        tax.set("Sales Tax", "food", "9.0");
        tax.set("Misc", "tax_takeout_food", "0");
        tax.save(conf.join("tax.ini")).unwrap();

        let reloaded = Settings::load(&path, &conf).unwrap();
        assert_eq!(reloaded.tax_food, Percent::from_scaled(90_000));
        assert!(!reloaded.tax_takeout_food);
        // Untouched keys keep their binary values.
        assert_eq!(reloaded.tax_alcohol, settings.tax_alcohol);
    }

    #[test]
    fn missing_settings_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(
            &dir.path().join("settings.dat"),
            &dir.path().join("conf"),
        )
        .unwrap();
        assert_eq!(settings.double_mult, 2.0);
        assert!(settings.tax_takeout_food);
    }

    #[test]
    fn global_media_slice_roundtrip() {
        use common::constants::GLOBAL_MEDIA_ID;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("media.dat");

        let mut settings = sample();
        settings.coupons.insert(CouponInfo {
            id: GLOBAL_MEDIA_ID + 4,
            name: "chainwide".into(),
            active: true,
            amount: MediaAmount::Flat(Money::from_cents(300)),
            window: None,
            weekday_mask: 0,
        });
        settings.save_global_media(&path).unwrap();

        let mut fresh = Settings::default();
        fresh.load_global_media(&path).unwrap();
        assert_eq!(fresh.coupons.len(), 1);
        assert!(fresh.coupons.find(GLOBAL_MEDIA_ID + 4).is_some());
        // The local discount did not leak into the global slice.
        assert!(fresh.discounts.is_empty());
    }
}
