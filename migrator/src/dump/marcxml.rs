//! MARCXML to JSON transformation
//!
//! Legacy revisions are stored as MARCXML. Each supported legacy schema
//! generation has its own mapping, chosen once at startup.

use crate::error::{MigrateError, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

/// Legacy schema generation of the source installation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaVersion {
    /// Invenio 1.x: mapped fields plus every unmapped tag kept verbatim
    #[default]
    V1,
    /// Invenio 2.x: mapped fields only
    V2,
}

impl SchemaVersion {
    /// Convert one MARCXML revision into target metadata.
    pub fn transform(self, marcxml: &str) -> Result<Value> {
        let record = parse_marcxml(marcxml)?;
        let mut data = map_common(&record);
        if self == SchemaVersion::V1 {
            if let Value::Object(blob) = record.to_blob() {
                for (key, value) in blob {
                    let tag = key.get(..3).unwrap_or(&key);
                    if !MAPPED_TAGS.contains(&tag) {
                        data.entry(key).or_insert(value);
                    }
                }
            }
        }
        Ok(Value::Object(data))
    }
}

impl std::str::FromStr for SchemaVersion {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v1" | "1" | "invenio1" => Ok(SchemaVersion::V1),
            "v2" | "2" | "invenio2" => Ok(SchemaVersion::V2),
            other => Err(MigrateError::Config(format!("unknown schema version: {}", other))),
        }
    }
}

const MAPPED_TAGS: &[&str] = &["001", "024", "100", "245", "260", "520", "653", "700", "909", "980"];

/// A MARC data field with indicators and ordered subfields
#[derive(Debug, Clone, PartialEq)]
pub struct DataField {
    pub tag: String,
    pub ind1: char,
    pub ind2: char,
    pub subfields: Vec<(String, String)>,
}

impl DataField {
    fn blob_key(&self) -> String {
        format!("{}{}{}", self.tag, blank_to_underscore(self.ind1), blank_to_underscore(self.ind2))
    }

    pub fn subfield(&self, code: &str) -> Option<&str> {
        self.subfields
            .iter()
            .find(|(c, _)| c == code)
            .map(|(_, v)| v.as_str())
    }
}

/// Parsed content of a single `<record>`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarcRecord {
    pub controlfields: Vec<(String, String)>,
    pub datafields: Vec<DataField>,
}

impl MarcRecord {
    pub fn controlfield(&self, tag: &str) -> Option<&str> {
        self.controlfields
            .iter()
            .find(|(t, _)| t == tag)
            .map(|(_, v)| v.as_str())
    }

    pub fn fields<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a DataField> + 'a {
        self.datafields.iter().filter(move |f| f.tag == tag)
    }

    /// All values of `code` across every `tag` field
    pub fn values<'a>(&'a self, tag: &'a str, code: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields(tag).flat_map(move |f| {
            f.subfields
                .iter()
                .filter(move |(c, _)| c == code)
                .map(|(_, v)| v.as_str())
        })
    }

    /// Raw MARC blob keyed by tag and indicators
    pub fn to_blob(&self) -> Value {
        let mut blob = Map::new();
        for (tag, value) in &self.controlfields {
            push_value(&mut blob, tag.clone(), Value::String(value.clone()));
        }
        for field in &self.datafields {
            let mut sub = Map::new();
            for (code, value) in &field.subfields {
                push_value(&mut sub, code.clone(), Value::String(value.clone()));
            }
            push_value(&mut blob, field.blob_key(), Value::Object(sub));
        }
        Value::Object(blob)
    }
}

fn blank_to_underscore(c: char) -> char {
    if c == ' ' {
        '_'
    } else {
        c
    }
}

/// Insert, turning repeated keys into arrays
fn push_value(map: &mut Map<String, Value>, key: String, value: Value) {
    match map.get_mut(&key) {
        None => {
            map.insert(key, value);
        }
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
    }
}

fn xml_err(err: impl std::fmt::Display) -> MigrateError {
    MigrateError::malformed(format!("marcxml: {}", err))
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for a in e.attributes() {
        let a = a.map_err(xml_err)?;
        if a.key.local_name().as_ref() == name {
            let value = a.unescape_value().map_err(xml_err)?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// A MARC tag is exactly three ASCII alphanumerics.
fn marc_tag(value: Option<String>, element: &str) -> Result<String> {
    let tag = value.ok_or_else(|| MigrateError::malformed(format!("marcxml: {} without tag", element)))?;
    if tag.len() != 3 || !tag.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(MigrateError::malformed(format!("marcxml: invalid {} tag {:?}", element, tag)));
    }
    Ok(tag)
}

fn indicator(value: Option<String>) -> char {
    value.and_then(|v| v.chars().next()).unwrap_or(' ')
}

/// Parse the first `<record>` of a MARCXML document.
pub fn parse_marcxml(xml: &str) -> Result<MarcRecord> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut record = MarcRecord::default();
    let mut seen_record = false;
    let mut control_tag: Option<String> = None;
    let mut field: Option<DataField> = None;
    let mut code: Option<String> = None;
    let mut text = String::new();

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"record" => seen_record = true,
                b"controlfield" => {
                    control_tag = Some(marc_tag(attr(&e, b"tag")?, "controlfield")?);
                    text.clear();
                }
                b"datafield" => {
                    let tag = marc_tag(attr(&e, b"tag")?, "datafield")?;
                    field = Some(DataField {
                        tag,
                        ind1: indicator(attr(&e, b"ind1")?),
                        ind2: indicator(attr(&e, b"ind2")?),
                        subfields: Vec::new(),
                    });
                }
                b"subfield" => {
                    code = attr(&e, b"code")?;
                    text.clear();
                }
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"record" => {
                    seen_record = true;
                    break;
                }
                b"datafield" => {
                    record.datafields.push(DataField {
                        tag: marc_tag(attr(&e, b"tag")?, "datafield")?,
                        ind1: indicator(attr(&e, b"ind1")?),
                        ind2: indicator(attr(&e, b"ind2")?),
                        subfields: Vec::new(),
                    });
                }
                _ => {}
            },
            Event::Text(t) => text.push_str(&t.unescape().map_err(xml_err)?),
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c.into_inner())),
            Event::End(e) => match e.local_name().as_ref() {
                b"controlfield" => {
                    if let Some(tag) = control_tag.take() {
                        record.controlfields.push((tag, std::mem::take(&mut text)));
                    }
                }
                b"subfield" => {
                    if let (Some(f), Some(c)) = (field.as_mut(), code.take()) {
                        f.subfields.push((c, std::mem::take(&mut text)));
                    }
                }
                b"datafield" => {
                    if let Some(f) = field.take() {
                        record.datafields.push(f);
                    }
                }
                b"record" => break,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_record {
        return Err(MigrateError::malformed("marcxml: no <record> element"));
    }
    Ok(record)
}

fn map_common(record: &MarcRecord) -> Map<String, Value> {
    let mut data = Map::new();

    if let Some(recid) = record.controlfield("001") {
        let value = recid
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(recid.to_string()));
        data.insert("recid".into(), value);
    }
    if let Some(title) = record.values("245", "a").next() {
        data.insert("title".into(), Value::String(title.to_string()));
    }

    let creators: Vec<Value> = record
        .values("100", "a")
        .chain(record.values("700", "a"))
        .map(|name| serde_json::json!({ "name": name }))
        .collect();
    if !creators.is_empty() {
        data.insert("creators".into(), Value::Array(creators));
    }

    if let Some(abstract_) = record.values("520", "a").next() {
        data.insert("description".into(), Value::String(abstract_.to_string()));
    }
    if let Some(date) = record.values("260", "c").next() {
        data.insert("publication_date".into(), Value::String(date.to_string()));
    }

    let keywords: Vec<Value> = record
        .values("653", "a")
        .map(|k| Value::String(k.to_string()))
        .collect();
    if !keywords.is_empty() {
        data.insert("keywords".into(), Value::Array(keywords));
    }

    let doi = record
        .fields("024")
        .find(|f| f.subfield("2").map(|s| s.eq_ignore_ascii_case("doi")).unwrap_or(false))
        .and_then(|f| f.subfield("a"));
    if let Some(doi) = doi {
        data.insert("doi".into(), Value::String(doi.to_string()));
    }

    let oai = record
        .fields("909")
        .filter(|f| f.ind1 == 'C' && f.ind2 == 'O')
        .find_map(|f| f.subfield("o"));
    if let Some(oai) = oai {
        data.insert("_oai".into(), serde_json::json!({ "id": oai }));
    }

    let mut collections: Vec<String> = Vec::new();
    for field in record.fields("980") {
        if let Some(a) = field.subfield("a") {
            let name = a.to_lowercase();
            if !collections.contains(&name) {
                collections.push(name);
            }
        }
        if field.subfield("c").map(|c| c.eq_ignore_ascii_case("deleted")).unwrap_or(false)
            && !collections.iter().any(|c| c == "deleted")
        {
            collections.push("deleted".to_string());
        }
    }
    if !collections.is_empty() {
        data.insert(
            "collections".into(),
            Value::Array(collections.into_iter().map(Value::String).collect()),
        );
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<collection xmlns="http://www.loc.gov/MARC21/slim">
<record>
  <controlfield tag="001">11782</controlfield>
  <controlfield tag="005">20141013082747.0</controlfield>
  <datafield tag="024" ind1="7" ind2=" ">
    <subfield code="a">10.5281/zenodo.11782</subfield>
    <subfield code="2">DOI</subfield>
  </datafield>
  <datafield tag="100" ind1=" " ind2=" ">
    <subfield code="a">Porecha, Parin</subfield>
  </datafield>
  <datafield tag="245" ind1=" " ind2=" ">
    <subfield code="a">CERN openlab &amp; summer student report</subfield>
  </datafield>
  <datafield tag="700" ind1=" " ind2=" ">
    <subfield code="a">Doe, Jane</subfield>
  </datafield>
  <datafield tag="856" ind1="4" ind2=" ">
    <subfield code="u">https://example.org/a.pdf</subfield>
    <subfield code="u">https://example.org/b.pdf</subfield>
  </datafield>
  <datafield tag="909" ind1="C" ind2="O">
    <subfield code="o">oai:zenodo.org:11782</subfield>
  </datafield>
  <datafield tag="980" ind1=" " ind2=" ">
    <subfield code="a">publication</subfield>
  </datafield>
</record>
<record>
  <controlfield tag="001">99</controlfield>
</record>
</collection>"#;

    #[test]
    fn test_parse_first_record_only() {
        let record = parse_marcxml(SAMPLE).unwrap();
        assert_eq!(record.controlfield("001"), Some("11782"));
        assert_eq!(record.datafields.len(), 7);
        assert_eq!(
            record.values("245", "a").next(),
            Some("CERN openlab & summer student report")
        );
    }

    #[test]
    fn test_blob_keys_and_repeats() {
        let blob = parse_marcxml(SAMPLE).unwrap().to_blob();
        assert_eq!(blob["001"], "11782");
        assert_eq!(blob["245__"]["a"], "CERN openlab & summer student report");
        assert_eq!(blob["8564_"]["u"].as_array().unwrap().len(), 2);
        assert_eq!(blob["909CO"]["o"], "oai:zenodo.org:11782");
    }

    #[test]
    fn test_v1_keeps_unmapped_tags() {
        let data = SchemaVersion::V1.transform(SAMPLE).unwrap();
        assert_eq!(data["recid"], 11782);
        assert_eq!(data["doi"], "10.5281/zenodo.11782");
        assert_eq!(data["_oai"]["id"], "oai:zenodo.org:11782");
        assert_eq!(data["creators"].as_array().unwrap().len(), 2);
        assert_eq!(data["collections"][0], "publication");
        assert!(data.get("8564_").is_some());
        assert!(data.get("005").is_some());
    }

    #[test]
    fn test_v2_drops_unmapped_tags() {
        let data = SchemaVersion::V2.transform(SAMPLE).unwrap();
        assert_eq!(data["title"], "CERN openlab & summer student report");
        assert!(data.get("8564_").is_none());
        assert!(data.get("005").is_none());
    }

    #[test]
    fn test_deleted_marker() {
        let xml = r#"<record>
          <controlfield tag="001">5</controlfield>
          <datafield tag="980" ind1=" " ind2=" "><subfield code="c">DELETED</subfield></datafield>
        </record>"#;
        let data = SchemaVersion::V2.transform(xml).unwrap();
        assert_eq!(data["collections"], serde_json::json!(["deleted"]));
    }

    #[test]
    fn test_self_closing_record_is_empty() {
        let record = parse_marcxml("<collection><record/></collection>").unwrap();
        assert!(record.controlfields.is_empty());
        assert!(record.datafields.is_empty());
        assert_eq!(SchemaVersion::V1.transform("<record/>").unwrap(), serde_json::json!({}));
    }

    #[test]
    fn test_invalid_tags_are_malformed() {
        for xml in [
            r#"<record><datafield tag="éé" ind1=" " ind2=" "><subfield code="a">x</subfield></datafield></record>"#,
            r#"<record><datafield tag="24" ind1=" " ind2=" "/></record>"#,
            r#"<record><controlfield tag="0011">1</controlfield></record>"#,
            r#"<record><datafield ind1=" " ind2=" "/></record>"#,
        ] {
            let err = SchemaVersion::V1.transform(xml).unwrap_err();
            assert!(matches!(err, MigrateError::MalformedDump(_)), "{}", xml);
        }
    }

    #[test]
    fn test_rejects_non_marc() {
        assert!(parse_marcxml("<html><body/></html>").is_err());
        assert!(parse_marcxml("<record><datafield></record>").is_err());
    }
}
