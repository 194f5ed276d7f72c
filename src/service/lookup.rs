//! 税号前两位 -> 州/属地名称

use std::collections::HashMap;

/// 供应商汇总使用的州名解析, 由调用方注入
pub trait StateCodeLookup: Send + Sync {
    fn state_name(&self, code: &str) -> Option<String>;

    /// 取税号前两位解析
    fn state_for_gstin(&self, gstin: &str) -> Option<String> {
        let code = gstin.trim().get(..2)?;
        self.state_name(code)
    }
}

const GST_STATE_CODES: &[(&str, &str)] = &[
    ("01", "Jammu and Kashmir"),
    ("02", "Himachal Pradesh"),
    ("03", "Punjab"),
    ("04", "Chandigarh"),
    ("05", "Uttarakhand"),
    ("06", "Haryana"),
    ("07", "Delhi"),
    ("08", "Rajasthan"),
    ("09", "Uttar Pradesh"),
    ("10", "Bihar"),
    ("11", "Sikkim"),
    ("12", "Arunachal Pradesh"),
    ("13", "Nagaland"),
    ("14", "Manipur"),
    ("15", "Mizoram"),
    ("16", "Tripura"),
    ("17", "Meghalaya"),
    ("18", "Assam"),
    ("19", "West Bengal"),
    ("20", "Jharkhand"),
    ("21", "Odisha"),
    ("22", "Chhattisgarh"),
    ("23", "Madhya Pradesh"),
    ("24", "Gujarat"),
    ("26", "Dadra and Nagar Haveli and Daman and Diu"),
    ("27", "Maharashtra"),
    ("29", "Karnataka"),
    ("30", "Goa"),
    ("31", "Lakshadweep"),
    ("32", "Kerala"),
    ("33", "Tamil Nadu"),
    ("34", "Puducherry"),
    ("35", "Andaman and Nicobar Islands"),
    ("36", "Telangana"),
    ("37", "Andhra Pradesh"),
    ("38", "Ladakh"),
    ("97", "Other Territory"),
    ("99", "Centre Jurisdiction"),
];

/// 内置码表, 可追加或覆盖条目
#[derive(Debug, Clone)]
pub struct GstStateTable {
    names: HashMap<String, String>,
}

impl Default for GstStateTable {
    fn default() -> Self {
        Self {
            names: GST_STATE_CODES
                .iter()
                .map(|(code, name)| (code.to_string(), name.to_string()))
                .collect(),
        }
    }
}

impl GstStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, code: &str, name: &str) -> Self {
        self.names.insert(code.to_string(), name.to_string());
        self
    }
}

impl StateCodeLookup for GstStateTable {
    fn state_name(&self, code: &str) -> Option<String> {
        self.names.get(code).cloned()
    }
}
