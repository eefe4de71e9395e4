table! {
    documents (id) {
        id -> Uuid,
        title -> Varchar,
        description -> Nullable<Varchar>,
        owner_email -> Varchar,
        owner_name -> Varchar,
        status -> crate::models::DocumentStatusMapping,
        order_mode -> crate::models::OrderModeMapping,
        original_file_url -> Varchar,
        original_file_name -> Varchar,
        original_file_mime_type -> Varchar,
        original_file_sha512 -> Varchar,
        signed_file_url -> Nullable<Varchar>,
        total_signers -> Int4,
        signed_count -> Int4,
        created_at -> Timestamptz,
        sent_at -> Nullable<Timestamptz>,
        completed_at -> Nullable<Timestamptz>,
        voided_at -> Nullable<Timestamptz>,
        void_reason -> Nullable<Varchar>,
        declined_at -> Nullable<Timestamptz>,
        render_claimed_at -> Nullable<Timestamptz>,
    }
}

table! {
    recipients (id) {
        id -> Uuid,
        document_id -> Uuid,
        name -> Varchar,
        email -> Varchar,
        role -> crate::models::RecipientRoleMapping,
        signer_type -> Nullable<crate::models::SignerTypeMapping>,
        signing_order -> Int4,
        status -> crate::models::RecipientStatusMapping,
        token -> Nullable<Varchar>,
        token_issued_at -> Nullable<Timestamptz>,
        token_expires_at -> Nullable<Timestamptz>,
        decline_reason -> Nullable<Varchar>,
        ip_address -> Nullable<Varchar>,
        user_agent -> Nullable<Varchar>,
        sent_at -> Nullable<Timestamptz>,
        viewed_at -> Nullable<Timestamptz>,
        signed_at -> Nullable<Timestamptz>,
        declined_at -> Nullable<Timestamptz>,
    }
}

table! {
    fields (id) {
        id -> Uuid,
        document_id -> Uuid,
        recipient_id -> Uuid,
        field_type -> crate::models::FieldTypeMapping,
        label -> Nullable<Varchar>,
        placeholder -> Nullable<Varchar>,
        options -> Array<Text>,
        required -> Bool,
        page -> Int4,
        pos_x -> Float8,
        pos_y -> Float8,
        width -> Float8,
        height -> Float8,
        value -> Nullable<Jsonb>,
        filled_at -> Nullable<Timestamptz>,
    }
}

table! {
    audit_log (id) {
        id -> Uuid,
        document_id -> Uuid,
        recipient_id -> Nullable<Uuid>,
        sequence -> Int8,
        timestamp -> Timestamptz,
        action -> Varchar,
        details -> Jsonb,
        actor_email -> Varchar,
        actor_name -> Varchar,
        ip_address -> Nullable<Varchar>,
        user_agent -> Nullable<Varchar>,
        geolocation -> Nullable<Varchar>,
        previous_hash -> Nullable<Varchar>,
        hash -> Varchar,
    }
}

joinable!(recipients -> documents (document_id));
joinable!(fields -> documents (document_id));
joinable!(fields -> recipients (recipient_id));

allow_tables_to_appear_in_same_query!(
    documents,
    recipients,
    fields,
    audit_log,
);
