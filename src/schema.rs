use crate::queries::{ColumnKind, Table};

pub fn area() -> Table {
    Table::new("data_area")
        .column("name", ColumnKind::Varchar)
        .column("area_type", ColumnKind::Varchar)
}

pub fn officer() -> Table {
    Table::new("data_officer")
        .column("first_name", ColumnKind::Varchar)
        .column("last_name", ColumnKind::Varchar)
        .column("race", ColumnKind::Varchar)
        .column("gender", ColumnKind::Varchar)
        .column("birth_year", ColumnKind::Integer)
        .column("rank", ColumnKind::Varchar)
        .column("appointed_date", ColumnKind::Date)
        .column("allegation_count", ColumnKind::Integer)
        .column("sustained_count", ColumnKind::Integer)
        .column("complaint_percentile", ColumnKind::Numeric)
        .column("civilian_allegation_percentile", ColumnKind::Numeric)
        .column("internal_allegation_percentile", ColumnKind::Numeric)
        .column("trr_percentile", ColumnKind::Numeric)
}

pub fn allegation() -> Table {
    Table::new("data_allegation")
        .column("crid", ColumnKind::Varchar)
        .column("summary", ColumnKind::Text)
        .column("incident_date", ColumnKind::TimestampTz)
        .column("point", ColumnKind::Geometry)
        .foreign_key("beat_id", "data_area")
        .column("is_officer_complaint", ColumnKind::Boolean)
}

pub fn officer_allegation() -> Table {
    Table::new("data_officerallegation")
        .foreign_key("allegation_id", "data_allegation")
        .foreign_key("officer_id", "data_officer")
        .column("final_finding", ColumnKind::Varchar)
        .column("start_date", ColumnKind::Date)
        .column("disciplined", ColumnKind::Boolean)
}

pub fn police_witness() -> Table {
    Table::new("data_policewitness")
        .foreign_key("allegation_id", "data_allegation")
        .foreign_key("officer_id", "data_officer")
}

pub fn complainant() -> Table {
    Table::new("data_complainant")
        .foreign_key("allegation_id", "data_allegation")
        .column("race", ColumnKind::Varchar)
        .column("gender", ColumnKind::Varchar)
        .column("age", ColumnKind::Integer)
}

pub fn investigator_allegation() -> Table {
    Table::new("data_investigatorallegation")
        .foreign_key("allegation_id", "data_allegation")
        .column("investigator_id", ColumnKind::Integer)
}

pub fn gender_display(code: &str) -> &str {
    match code {
        "M" => "Male",
        "F" => "Female",
        "X" => "X",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn officer_allegation_joins_both_sides() {
        let join = allegation()
            .join_table("allegation", &officer_allegation(), "base_table")
            .unwrap();
        assert_eq!(
            join,
            "LEFT JOIN data_allegation allegation ON allegation.id = base_table.allegation_id"
        );
        assert_eq!(
            officer_allegation()
                .find_foreign_key_to(&officer())
                .unwrap()
                .name,
            "officer_id"
        );
    }

    #[test]
    fn gender_codes() {
        assert_eq!(gender_display("M"), "Male");
        assert_eq!(gender_display("F"), "Female");
        assert_eq!(gender_display(""), "");
    }
}
